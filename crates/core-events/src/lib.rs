//! Output records and sinks.
//!
//! Two append-only streams leave the engine: the spatio-temporal event log
//! (visualization input) and the per-task KPI log (delay/utilization
//! analysis). Records are produced in *production order* — one AGV may run
//! ahead of another's clock, so `start_time` is not globally monotone;
//! consumers sort. Within a single AGV, emission order is monotone in time.
//!
//! The wire format is CSV with column-major coordinates: `sx`/`ex` carry
//! the column, `sy`/`ey` the row. That inversion is confined to
//! `EventRecord::csv_row`; everything upstream speaks `Cell`.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use core_station::StationId;
use core_world::{AgvId, Cell, Sec};
use std::fmt;
use std::path::Path;

mod status;
pub use status::{StationStatus, StatusColor};

/// Event discriminator, serialized in SCREAMING_SNAKE form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgvMove,
    ShelfLoad,
    ShelfUnload,
    ShuffleLoad,
    ShuffleUnload,
    Picking,
    StationStatus,
    Yield,
    ForceTele,
    Parking,
    Init,
    Heartbeat,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AgvMove => "AGV_MOVE",
            EventKind::ShelfLoad => "SHELF_LOAD",
            EventKind::ShelfUnload => "SHELF_UNLOAD",
            EventKind::ShuffleLoad => "SHUFFLE_LOAD",
            EventKind::ShuffleUnload => "SHUFFLE_UNLOAD",
            EventKind::Picking => "PICKING",
            EventKind::StationStatus => "STATION_STATUS",
            EventKind::Yield => "YIELD",
            EventKind::ForceTele => "FORCE_TELE",
            EventKind::Parking => "PARKING",
            EventKind::Init => "INIT",
            EventKind::Heartbeat => "HEARTBEAT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log subject: a vehicle (`AGV_<n>`) or a workstation (`WS_<id>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectId {
    Agv(AgvId),
    Workstation(StationId),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Agv(id) => write!(f, "{id}"),
            ObjectId::Workstation(sid) => write!(f, "WS_{sid}"),
        }
    }
}

/// One event-log row.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub floor: String,
    pub obj: ObjectId,
    pub from: Cell,
    pub to: Cell,
    pub kind: EventKind,
    pub text: String,
}

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl EventRecord {
    pub const HEADER: [&'static str; 10] = [
        "start_time",
        "end_time",
        "floor",
        "obj_id",
        "sx",
        "sy",
        "ex",
        "ey",
        "type",
        "text",
    ];

    fn csv_row(&self) -> [String; 10] {
        [
            self.start.format(TS_FORMAT).to_string(),
            self.end.format(TS_FORMAT).to_string(),
            self.floor.clone(),
            self.obj.to_string(),
            self.from.col.to_string(),
            self.from.row.to_string(),
            self.to.col.to_string(),
            self.to.row.to_string(),
            self.kind.to_string(),
            self.text.clone(),
        ]
    }
}

/// Outbound vs inbound flow, derived from the wave identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Outbound,
    Inbound,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Outbound => "OUTBOUND",
            TaskKind::Inbound => "INBOUND",
        }
    }
}

/// One KPI row, emitted at task completion.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiRecord {
    pub finish: NaiveDateTime,
    pub kind: TaskKind,
    pub wave_id: String,
    pub delayed: bool,
    pub workstation: StationId,
    pub total_in_wave: usize,
    pub deadline_ts: i64,
}

impl KpiRecord {
    pub const HEADER: [&'static str; 8] = [
        "finish_time",
        "type",
        "wave_id",
        "is_delayed",
        "date",
        "workstation",
        "total_in_wave",
        "deadline_ts",
    ];

    fn csv_row(&self) -> [String; 8] {
        [
            self.finish.format(TS_FORMAT).to_string(),
            self.kind.as_str().to_string(),
            self.wave_id.clone(),
            if self.delayed { "Y" } else { "N" }.to_string(),
            self.finish.date().format("%Y-%m-%d").to_string(),
            self.workstation.to_string(),
            self.total_in_wave.to_string(),
            self.deadline_ts.to_string(),
        ]
    }
}

/// Wall-clock translation: second offsets → timestamps from the run epoch.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    base: NaiveDateTime,
}

impl SimClock {
    pub fn new(base: NaiveDateTime) -> Self {
        Self { base }
    }

    pub fn base(&self) -> NaiveDateTime {
        self.base
    }

    pub fn at(&self, sec: Sec) -> NaiveDateTime {
        self.base + Duration::seconds(sec)
    }

    /// Unix timestamp of `base + hours`, the wave deadline.
    pub fn deadline_ts(&self, hours: i64) -> i64 {
        (self.base + Duration::hours(hours)).and_utc().timestamp()
    }
}

/// Destination for engine output. The engine only ever appends; flushing
/// and closing are the owner's business at end of run.
pub trait OutputSink {
    fn emit_event(&mut self, rec: EventRecord) -> Result<()>;
    fn emit_kpi(&mut self, rec: KpiRecord) -> Result<()>;
}

/// Production sink: two CSV files in the log directory.
pub struct CsvSink {
    events: csv::Writer<std::fs::File>,
    kpis: csv::Writer<std::fs::File>,
}

pub const EVENTS_FILE: &str = "simulation_events.csv";
pub const KPI_FILE: &str = "simulation_kpi.csv";

impl CsvSink {
    pub fn create(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
        let events_path = log_dir.join(EVENTS_FILE);
        let kpi_path = log_dir.join(KPI_FILE);
        let mut events = csv::Writer::from_path(&events_path)
            .with_context(|| format!("opening {}", events_path.display()))?;
        events.write_record(EventRecord::HEADER)?;
        let mut kpis = csv::Writer::from_path(&kpi_path)
            .with_context(|| format!("opening {}", kpi_path.display()))?;
        kpis.write_record(KpiRecord::HEADER)?;
        Ok(Self { events, kpis })
    }

    pub fn finish(mut self) -> Result<()> {
        self.events.flush()?;
        self.kpis.flush()?;
        Ok(())
    }
}

impl OutputSink for CsvSink {
    fn emit_event(&mut self, rec: EventRecord) -> Result<()> {
        self.events.write_record(rec.csv_row())?;
        Ok(())
    }

    fn emit_kpi(&mut self, rec: KpiRecord) -> Result<()> {
        self.kpis.write_record(rec.csv_row())?;
        Ok(())
    }
}

/// Test sink: retains every record for assertion.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<EventRecord>,
    pub kpis: Vec<KpiRecord>,
}

impl OutputSink for MemorySink {
    fn emit_event(&mut self, rec: EventRecord) -> Result<()> {
        self.events.push(rec);
        Ok(())
    }

    fn emit_kpi(&mut self, rec: KpiRecord) -> Result<()> {
        self.kpis.push(rec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn clock_offsets_and_deadline() {
        let clock = SimClock::new(base());
        assert_eq!(clock.at(0), base());
        assert_eq!(
            clock.at(61).format("%H:%M:%S").to_string(),
            "08:01:01".to_string()
        );
        assert_eq!(
            clock.deadline_ts(4) - clock.base().and_utc().timestamp(),
            4 * 3600
        );
    }

    #[test]
    fn event_row_is_column_major() {
        let rec = EventRecord {
            start: base(),
            end: base(),
            floor: "2F".into(),
            obj: ObjectId::Agv(AgvId(7)),
            from: Cell::new(3, 10),
            to: Cell::new(4, 11),
            kind: EventKind::AgvMove,
            text: String::new(),
        };
        let row = rec.csv_row();
        assert_eq!(row[3], "AGV_7");
        assert_eq!((&row[4][..], &row[5][..]), ("10", "3")); // sx=col, sy=row
        assert_eq!((&row[6][..], &row[7][..]), ("11", "4"));
        assert_eq!(row[8], "AGV_MOVE");
    }

    #[test]
    fn csv_sink_writes_headers_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::create(dir.path()).unwrap();
        sink.emit_event(EventRecord {
            start: base(),
            end: base(),
            floor: "2F".into(),
            obj: ObjectId::Workstation(StationId::from("2F_1")),
            from: Cell::new(0, 0),
            to: Cell::new(0, 0),
            kind: EventKind::StationStatus,
            text: StationStatus::idle().to_string(),
        })
        .unwrap();
        sink.emit_kpi(KpiRecord {
            finish: base(),
            kind: TaskKind::Inbound,
            wave_id: "RECEIVING_20240301".into(),
            delayed: false,
            workstation: StationId::from("2F_1"),
            total_in_wave: 12,
            deadline_ts: 1_709_280_000,
        })
        .unwrap();
        sink.finish().unwrap();

        let events = std::fs::read_to_string(dir.path().join(EVENTS_FILE)).unwrap();
        let mut lines = events.lines();
        assert_eq!(
            lines.next().unwrap(),
            "start_time,end_time,floor,obj_id,sx,sy,ex,ey,type,text"
        );
        let row = lines.next().unwrap();
        assert!(row.contains("WS_2F_1"));
        assert!(row.contains("WHITE|IDLE|N"));

        let kpis = std::fs::read_to_string(dir.path().join(KPI_FILE)).unwrap();
        let mut lines = kpis.lines();
        assert_eq!(
            lines.next().unwrap(),
            "finish_time,type,wave_id,is_delayed,date,workstation,total_in_wave,deadline_ts"
        );
        assert!(lines.next().unwrap().contains("INBOUND"));
    }
}
