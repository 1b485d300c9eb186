//! Result files of one analyzer run.
//!
//! ```text
//!   <dir>/<category>.jsonl         one JSON entity per line
//!   <dir>/geoms-<analyzer>.db      one table per category with geometry
//!   <dir>/stats-<analyzer>.db      stats (date, key, value), appended to
//! ```

use anyhow::{Context, Result};
use osmcheck::{AnomalySink, Entity, Error, GeometryRecord, Stats, StatsSink, Timestamp};
use rusqlite::{params, Connection};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes categories as JSON lines and geometries into SQLite.
///
/// Geometry rows go into one transaction that is committed by
/// [`close`](FileSink::close); dropping the sink without closing loses
/// them.
pub struct FileSink {
    dir: PathBuf,
    writers: BTreeMap<String, BufWriter<File>>,
    db: Connection,
    tables: BTreeSet<String>,
}

impl FileSink {
    pub fn create(dir: &Path, analyzer: &str) -> Result<Self> {
        let path = dir.join(format!("geoms-{analyzer}.db"));
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("can't replace '{}'", path.display()))?;
        }

        let db = Connection::open(&path)
            .with_context(|| format!("can't create '{}'", path.display()))?;
        db.execute_batch("PRAGMA journal_mode = OFF; PRAGMA synchronous = OFF; BEGIN;")?;

        Ok(Self {
            dir: dir.to_path_buf(),
            writers: BTreeMap::new(),
            db,
            tables: BTreeSet::new(),
        })
    }

    /// Creates the (empty) result file for each category up front, so every
    /// category has a file even when nothing is found.
    pub fn declare(&mut self, categories: &[&str]) -> Result<()> {
        for category in categories {
            self.writer(category)
                .with_context(|| format!("can't create result file for '{category}'"))?;
        }
        Ok(())
    }

    fn writer(&mut self, category: &str) -> io::Result<&mut BufWriter<File>> {
        match self.writers.entry(category.to_owned()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let file = File::create(self.dir.join(format!("{category}.jsonl")))?;
                Ok(slot.insert(BufWriter::new(file)))
            }
        }
    }

    fn table(&mut self, category: &str) -> rusqlite::Result<()> {
        if self.tables.contains(category) {
            return Ok(());
        }

        self.db.execute_batch(&format!(
            "CREATE TABLE \"{category}\" (
                geom TEXT NOT NULL,
                owner_id INTEGER,
                entity_kind TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                mark INTEGER NOT NULL DEFAULT 0
            );"
        ))?;
        self.tables.insert(category.to_owned());
        Ok(())
    }

    /// Flushes every result file and commits the geometry tables.
    pub fn close(mut self) -> Result<()> {
        for (category, writer) in &mut self.writers {
            writer
                .flush()
                .with_context(|| format!("can't write result file for '{category}'"))?;
        }
        self.db
            .execute_batch("COMMIT;")
            .context("can't commit geometry database")?;
        Ok(())
    }
}

impl AnomalySink for FileSink {
    fn write(&mut self, category: &str, entity: &Entity) -> osmcheck::Result<()> {
        let writer = self.writer(category)?;
        serde_json::to_writer(&mut *writer, entity).map_err(Error::sink_failed)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn write_geometry(&mut self, category: &str, record: &GeometryRecord) -> osmcheck::Result<()> {
        self.table(category).map_err(Error::sink_failed)?;

        let sql = format!(
            "INSERT INTO \"{category}\" (geom, owner_id, entity_kind, entity_id, timestamp, mark) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        );
        let mut statement = self.db.prepare_cached(&sql).map_err(Error::sink_failed)?;
        statement
            .execute(params![
                record.geometry.to_wkt(),
                record.owner_id.map(|id| id as i64),
                record.kind.as_str(),
                record.entity_id as i64,
                record.timestamp.to_iso(),
                record.marked,
            ])
            .map_err(Error::sink_failed)?;
        Ok(())
    }
}

/// Appends rows to `stats (date, key, value)`, all under one date.
pub struct SqliteStats {
    db: Connection,
    date: String,
}

impl SqliteStats {
    pub fn open(path: &Path, timestamp: Timestamp) -> Result<Self> {
        let db = Connection::open(path)
            .with_context(|| format!("can't open '{}'", path.display()))?;
        db.execute_batch("CREATE TABLE IF NOT EXISTS stats (date TEXT, key TEXT, value INT64 DEFAULT 0);")?;

        Ok(Self {
            db,
            date: timestamp.to_iso(),
        })
    }
}

impl StatsSink for SqliteStats {
    fn add(&mut self, name: &str, value: u64) -> osmcheck::Result<()> {
        let mut statement = self
            .db
            .prepare_cached("INSERT INTO stats (date, key, value) VALUES (?1, ?2, ?3)")
            .map_err(Error::sink_failed)?;
        statement
            .execute(params![self.date, name, value as i64])
            .map_err(Error::sink_failed)?;
        Ok(())
    }
}

/// Writes `stats` to `<dir>/stats-<analyzer>.db` under `timestamp`.
pub fn write_stats(dir: &Path, analyzer: &str, timestamp: Timestamp, stats: &Stats) -> Result<()> {
    let path = dir.join(format!("stats-{analyzer}.db"));
    let mut sink = SqliteStats::open(&path, timestamp)?;
    stats
        .write_to(&mut sink)
        .with_context(|| format!("can't write stats to '{}'", path.display()))?;

    for (name, value) in stats.iter() {
        log::info!("  {name}: {value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmcheck::{EntityKind, Geometry, Location, Point, TagList};

    fn point(id: u64) -> Entity {
        Entity::Point(Point {
            id,
            location: Location::new(10, 20),
            tags: [("amenity", "bench")].into_iter().collect(),
            timestamp: Timestamp::from_secs(0),
        })
    }

    #[test]
    fn writes_json_lines_and_geometry_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(dir.path(), "test").unwrap();
        sink.declare(&["empty"]).unwrap();

        sink.write("found", &point(1)).unwrap();
        sink.write("found", &point(2)).unwrap();
        sink.write_geometry(
            "found",
            &GeometryRecord {
                geometry: Geometry::Point(Location::new(10, 20)),
                owner_id: Some(9),
                kind: EntityKind::Point,
                entity_id: 1,
                timestamp: Timestamp::from_secs(0),
                marked: true,
            },
        )
        .unwrap();
        sink.close().unwrap();

        let lines = fs::read_to_string(dir.path().join("found.jsonl")).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(lines.lines().next().unwrap()).unwrap();
        assert_eq!(lines.lines().count(), 2);
        assert_eq!(first["type"], "point");
        assert_eq!(first["id"], 1);
        assert_eq!(first["timestamp"], "1970-01-01T00:00:00Z");
        assert_eq!(first["tags"][0][0], "amenity");
        assert_eq!(fs::read_to_string(dir.path().join("empty.jsonl")).unwrap(), "");

        let db = Connection::open(dir.path().join("geoms-test.db")).unwrap();
        let (geom, owner, mark): (String, Option<i64>, bool) = db
            .query_row("SELECT geom, owner_id, mark FROM found", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(geom, "POINT(0.0000010 0.0000020)");
        assert_eq!(owner, Some(9));
        assert!(mark);
    }

    #[test]
    fn stats_rows_share_one_date_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = Stats::new();
        stats.set("a", 1);
        stats.set("b", 2);

        let ts = Timestamp::from_iso("2020-02-02T02:02:02Z").unwrap();
        write_stats(dir.path(), "x", ts, &stats).unwrap();
        write_stats(dir.path(), "x", ts, &stats).unwrap();

        let db = Connection::open(dir.path().join("stats-x.db")).unwrap();
        let rows: i64 = db
            .query_row("SELECT count(*) FROM stats WHERE date = '2020-02-02T02:02:02Z'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 4);
        let b: i64 = db
            .query_row("SELECT value FROM stats WHERE key = 'b' LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(b, 2);
    }
}
