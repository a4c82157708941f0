//! CLI command implementations.

use crate::daemon::DaemonTransport;
use crate::pack_file::FilePackWriter;
use crate::url::GitUrl;
use anyhow::{bail, Context, Result};
use gitsmart_protocol::{
    Capabilities, Direction, ObjectId, RemoteHead, SmartConfig, SmartConnection, SubTransport,
    TransferStats,
};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Loads protocol tuning from a YAML file, or the defaults.
pub fn load_config(path: Option<&Path>) -> Result<SmartConfig> {
    let Some(path) = path else {
        return Ok(SmartConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: SmartConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn connect(url: &str, direction: Direction, config: SmartConfig) -> Result<SmartConnection<DaemonTransport>> {
    let parsed = GitUrl::parse(url)?;
    let transport = DaemonTransport::new(parsed).with_timeout(READ_TIMEOUT);
    open(transport, url, direction, config)
}

fn open<T: SubTransport>(
    transport: T,
    url: &str,
    direction: Direction,
    config: SmartConfig,
) -> Result<SmartConnection<T>> {
    SmartConnection::connect(transport, url, direction, config)
        .with_context(|| format!("failed to connect to {url}"))
}

#[derive(Debug, Serialize)]
struct LsRemoteOutput {
    refs: Vec<RemoteHead>,
    capabilities: Capabilities,
}

/// List the refs of a remote.
pub fn ls_remote(url: &str, json: bool, config: SmartConfig) -> Result<()> {
    tracing::info!(url = %url, "Listing remote refs");

    let mut conn = connect(url, Direction::Fetch, config)?;
    let output = LsRemoteOutput {
        refs: conn.heads().collect(),
        capabilities: conn.capabilities().clone(),
    };
    conn.close();

    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, &output)?;
        writeln!(stdout)?;
    } else {
        for head in &output.refs {
            writeln!(stdout, "{}\t{}", head.oid, head.name)?;
        }
    }
    Ok(())
}

/// Fetch a pack from a remote into `output`.
pub fn fetch_pack(
    url: &str,
    output: &Path,
    wants: &[String],
    haves: &[String],
    config: SmartConfig,
) -> Result<()> {
    tracing::info!(url = %url, output = %output.display(), "Fetching pack");

    let conn = connect(url, Direction::Fetch, config)?;
    let stats = fetch_into(conn, output, wants, haves)?;
    eprintln!(
        "Received {} bytes, {} objects",
        stats.received_bytes, stats.total_objects
    );
    Ok(())
}

fn fetch_into<T: SubTransport>(
    mut conn: SmartConnection<T>,
    output: &Path,
    wants: &[String],
    haves: &[String],
) -> Result<TransferStats> {
    let wants = resolve_wants(conn.heads().collect::<Vec<_>>().as_slice(), wants)?;
    let haves = haves
        .iter()
        .map(|h| ObjectId::from_hex(h).with_context(|| format!("invalid --have {h:?}")))
        .collect::<Result<Vec<_>>>()?;

    let session = conn.negotiate_fetch(&wants, &mut haves.into_iter())?;
    tracing::info!(
        rounds = session.rounds,
        common = session.common.len(),
        "negotiation finished"
    );

    let mut writer = FilePackWriter::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut stats = TransferStats::default();
    let mut receiver = conn
        .pack_receiver()
        .on_progress(|text| {
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(b"remote: ");
            let _ = stderr.write_all(text);
        })
        .on_stats(|s| {
            tracing::info!(
                received_bytes = s.received_bytes,
                total_objects = s.total_objects,
                "receiving pack"
            );
        });
    conn.download_pack(&mut receiver, &mut writer, &mut stats)?;
    conn.close();
    Ok(stats)
}

/// Turns `--want` arguments into object ids. Without any, every advertised
/// ref is wanted.
fn resolve_wants(heads: &[RemoteHead], wants: &[String]) -> Result<Vec<ObjectId>> {
    let mut out: Vec<ObjectId> = Vec::new();
    let mut push = |oid: ObjectId| {
        if !out.contains(&oid) {
            out.push(oid);
        }
    };

    if wants.is_empty() {
        heads.iter().for_each(|h| push(h.oid));
    } else {
        for want in wants {
            if let Ok(oid) = ObjectId::from_hex(want) {
                push(oid);
                continue;
            }
            let head = heads
                .iter()
                .find(|h| h.name == *want || h.name == format!("refs/heads/{want}"))
                .with_context(|| format!("remote has no ref {want:?}"))?;
            push(head.oid);
        }
    }

    if out.is_empty() {
        bail!("nothing to fetch: the remote advertised no refs");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitsmart_protocol::{PktLine, Service};
    use pretty_assertions::assert_eq;
    use std::io::{self, Cursor, Read};

    fn head(n: u8, name: &str) -> RemoteHead {
        RemoteHead {
            oid: ObjectId::from_bytes([n; 20]),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_resolve_wants_defaults_to_all_refs() {
        let heads = [head(1, "HEAD"), head(1, "refs/heads/main"), head(2, "refs/tags/v1")];
        let wants = resolve_wants(&heads, &[]).unwrap();
        assert_eq!(wants, vec![heads[0].oid, heads[2].oid]);
    }

    #[test]
    fn test_resolve_wants_by_name_and_oid() {
        let heads = [head(1, "refs/heads/main"), head(2, "refs/heads/dev")];
        let oid = ObjectId::from_bytes([9; 20]);
        let wants = resolve_wants(&heads, &["dev".to_string(), oid.to_hex()]).unwrap();
        assert_eq!(wants, vec![heads[1].oid, oid]);
        assert!(resolve_wants(&heads, &["nope".to_string()]).is_err());
        assert!(resolve_wants(&[], &[]).is_err());
    }

    #[test]
    fn test_load_config_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gitsmart.yaml");
        std::fs::write(&path, "haves_per_round: 32\nprogress_threshold: 4096\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.haves_per_round, 32);
        assert_eq!(config.progress_threshold, 4096);
        assert_eq!(config.read_buffer_size, SmartConfig::default().read_buffer_size);

        std::fs::write(&path, "haves_per_round: 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
        assert_eq!(load_config(None).unwrap(), SmartConfig::default());
    }

    /// One stream replaying a canned daemon conversation.
    struct Canned(Option<Cursor<Vec<u8>>>);

    struct CannedStream(Cursor<Vec<u8>>);

    impl Read for CannedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for CannedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SubTransport for Canned {
        type Stream = CannedStream;

        fn action(&mut self, _url: &str, _service: Service) -> io::Result<CannedStream> {
            self.0
                .take()
                .map(CannedStream)
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "closed"))
        }
    }

    #[test]
    fn test_fetch_into_writes_pack() {
        let oid = ObjectId::from_bytes([1; 20]);
        let mut pack = b"PACK".to_vec();
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&3u32.to_be_bytes());
        pack.extend_from_slice(b"objects");

        let mut wire = Vec::new();
        for packet in [
            PktLine::Ref {
                oid,
                name: "refs/heads/main".into(),
                capabilities: Some("ofs-delta".into()),
            },
            PktLine::Flush,
            PktLine::Nak,
        ] {
            wire.extend_from_slice(&packet.encode().unwrap());
        }
        wire.extend_from_slice(&pack);

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out.pack");
        let conn = open(
            Canned(Some(Cursor::new(wire))),
            "git://test/repo",
            Direction::Fetch,
            SmartConfig::default(),
        )
        .unwrap();

        let stats = fetch_into(conn, &output, &[], &[]).unwrap();
        assert_eq!(stats.total_objects, 3);
        assert_eq!(stats.received_bytes, pack.len() as u64);
        assert_eq!(std::fs::read(&output).unwrap(), pack);
    }
}
