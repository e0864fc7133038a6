//! Property-map loader feeding the continuum's config stage.
//!
//! Tab-separated `KEY<TAB>VALUE` lines; blank and `#`-prefixed lines are
//! skipped, and lines missing the separator are reported and skipped rather
//! than aborting the load. The raw map is parsed first and validated into
//! typed fields afterward, with `anyhow::Context` wrapping I/O failures.

use std::collections::BTreeMap;

use anyhow::Context;
use tracing::warn;

use crate::continuum::{Continuum, ContinuumConfig};
use crate::endpoint::Endpoint;
use crate::error::Error;

/// A parsed `KEY<TAB>VALUE` property map, plus the `MalformedConfigLine`
/// errors raised (and recovered from) for lines missing the separator.
#[derive(Debug, Default)]
pub struct PropertyMap {
    pub entries: BTreeMap<String, String>,
    pub skipped_lines: Vec<Error>,
}

/// Parses `text` using the shared properties grammar. `sep` is normally a
/// tab; callers that want a different separator (none of the two call sites
/// in this crate do) may supply one.
pub fn parse_properties(text: &str, sep: char) -> PropertyMap {
    let mut map = PropertyMap::default();

    for (line_no, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match trimmed.split_once(sep) {
            Some((k, v)) => {
                map.entries.insert(k.trim().to_string(), v.trim().to_string());
            }
            None => {
                let err = Error::MalformedConfigLine {
                    line_no,
                    raw: trimmed.to_string(),
                };
                warn!(component = "glue", event = "malformed_line", line_no, raw = trimmed, "skipping line without separator");
                map.skipped_lines.push(err);
            }
        }
    }

    map
}

/// Reads and parses a properties file from disk.
pub fn load_properties_file(path: &std::path::Path, sep: char) -> anyhow::Result<PropertyMap> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading properties file {}", path.display()))?;
    Ok(parse_properties(&text, sep))
}

/// The three continuum tuning keys a properties file may declare.
#[derive(Debug, Clone, Copy)]
pub struct ContinuumProperties {
    pub total_servers: u16,
    pub points_per_server: u16,
    pub reserve_factor: f32,
}

impl ContinuumProperties {
    pub fn from_map(map: &PropertyMap) -> Result<Self, Error> {
        let total_servers = required_u16(map, "TOTAL_SERVERS")?;
        let points_per_server = required_u16(map, "POINTS_PER_SERVER")?;
        let reserve_factor = map
            .entries
            .get("RESERVE_FACTOR")
            .map(|v| v.parse::<f32>())
            .transpose()
            .map_err(|_| Error::MissingRequiredKey("RESERVE_FACTOR"))?
            .unwrap_or(1.5);

        Ok(Self {
            total_servers,
            points_per_server,
            reserve_factor,
        })
    }

    /// Converts the loaded properties into the config the continuum's
    /// build stage consumes. `TOTAL_SERVERS` becomes the declared cap the
    /// bulk load is rejected against, not a point-placement input.
    pub fn into_config(self) -> ContinuumConfig {
        ContinuumConfig {
            points_per_server: self.points_per_server,
            reserve_factor: self.reserve_factor,
            declared_server_count: self.total_servers,
        }
    }
}

fn required_u16(map: &PropertyMap, key: &'static str) -> Result<u16, Error> {
    map.entries
        .get(key)
        .ok_or(Error::MissingRequiredKey(key))?
        .parse::<u16>()
        .map_err(|_| Error::MissingRequiredKey(key))
}

/// Parses a shard file's `host:port -> capacity` entries. Unknown-format
/// keys are rejected per-line with a warning rather than aborting the load.
pub fn shard_entries_from_map(map: &PropertyMap) -> Vec<(Endpoint, u64)> {
    let mut out = Vec::with_capacity(map.entries.len());
    for (k, v) in &map.entries {
        match (Endpoint::parse(k), v.parse::<u64>()) {
            (Ok(endpoint), Ok(capacity)) => out.push((endpoint, capacity)),
            _ => {
                warn!(component = "glue", event = "bad_shard_entry", key = %k, value = %v, "skipping unparseable shard entry");
            }
        }
    }
    out
}

/// Loads a continuum properties file and a shard file, then builds the
/// `Continuum` they describe. This is the one place the Glue surface hands a
/// finished ring to a caller; everything upstream of it is pure parsing.
pub fn build_continuum_from_files(
    properties_path: &std::path::Path,
    shards_path: &std::path::Path,
) -> anyhow::Result<Continuum> {
    let props_map = load_properties_file(properties_path, '\t')?;
    let cfg = ContinuumProperties::from_map(&props_map)?.into_config();

    let shards_map = load_properties_file(shards_path, '\t')?;
    let shards = shard_entries_from_map(&shards_map);

    Ok(Continuum::build(cfg, shards)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_and_comment_lines() {
        let text = "\n# a comment\nA\tB\n\nTOTAL_SERVERS\t3\n";
        let map = parse_properties(text, '\t');
        assert_eq!(map.entries.get("A").map(String::as_str), Some("B"));
        assert_eq!(
            map.entries.get("TOTAL_SERVERS").map(String::as_str),
            Some("3")
        );
        assert!(map.skipped_lines.is_empty());
    }

    #[test]
    fn reports_and_skips_lines_without_separator() {
        let text = "A\tB\nno-separator-here\nC\tD\n";
        let map = parse_properties(text, '\t');
        assert_eq!(map.entries.len(), 2);
        assert_eq!(map.skipped_lines.len(), 1);
        assert!(matches!(
            &map.skipped_lines[0],
            Error::MalformedConfigLine { line_no: 1, raw } if raw == "no-separator-here"
        ));
    }

    #[test]
    fn continuum_properties_require_total_servers_and_points() {
        let map = parse_properties("POINTS_PER_SERVER\t100\n", '\t');
        assert!(matches!(
            ContinuumProperties::from_map(&map),
            Err(Error::MissingRequiredKey("TOTAL_SERVERS"))
        ));
    }

    #[test]
    fn continuum_properties_default_reserve_factor() {
        let map = parse_properties("TOTAL_SERVERS\t3\nPOINTS_PER_SERVER\t100\n", '\t');
        let props = ContinuumProperties::from_map(&map).unwrap();
        assert_eq!(props.total_servers, 3);
        assert_eq!(props.points_per_server, 100);
        assert!((props.reserve_factor - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn shard_entries_skip_unparseable_rows() {
        let map = parse_properties("10.0.0.1:80\t1000\nnot-an-endpoint\t5\n", '\t');
        let entries = shard_entries_from_map(&map);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, 1000);
    }

    #[test]
    fn builds_a_continuum_from_two_property_files() {
        let dir = std::env::temp_dir();
        let tag = format!("shardkv-continuum-glue-test-{}", std::process::id());
        let properties_path = dir.join(format!("{tag}.properties"));
        let shards_path = dir.join(format!("{tag}.shards"));

        std::fs::write(
            &properties_path,
            "# continuum tuning\nTOTAL_SERVERS\t8\nPOINTS_PER_SERVER\t100\n",
        )
        .unwrap();
        std::fs::write(
            &shards_path,
            "10.0.0.1:80\t1000000\n10.0.0.2:80\t1000000\n",
        )
        .unwrap();

        let ring = build_continuum_from_files(&properties_path, &shards_path).unwrap();

        std::fs::remove_file(&properties_path).ok();
        std::fs::remove_file(&shards_path).ok();

        assert_eq!(ring.total_servers(), 2);
        assert_eq!(ring.total_memory(), 2_000_000);
        ring.resolve(b"some-key").unwrap();
    }

    #[test]
    fn rejects_too_many_shards_declared_by_total_servers() {
        let dir = std::env::temp_dir();
        let tag = format!("shardkv-continuum-glue-cap-test-{}", std::process::id());
        let properties_path = dir.join(format!("{tag}.properties"));
        let shards_path = dir.join(format!("{tag}.shards"));

        std::fs::write(&properties_path, "TOTAL_SERVERS\t1\nPOINTS_PER_SERVER\t100\n").unwrap();
        std::fs::write(
            &shards_path,
            "10.0.0.1:80\t1\n10.0.0.2:80\t1\n",
        )
        .unwrap();

        let result = build_continuum_from_files(&properties_path, &shards_path);

        std::fs::remove_file(&properties_path).ok();
        std::fs::remove_file(&shards_path).ok();

        let err = result.expect_err("two shards exceed TOTAL_SERVERS=1");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::TooManyShards { got: 2, max: 1 })
        ));
    }
}
