//! One collection cycle: enumerate disks, scan them in parallel, join.
//!
//! Every scrape runs one full pass. Candidate device nodes are listed
//! under `/dev` and filtered to whole-disk names (`sda`, `sdb`, ...);
//! each candidate gets its own task on the blocking pool, since SG_IO
//! is a blocking syscall. Tasks are failure-isolated: any per-device
//! problem is logged (or, for the common "node is not ATA" case,
//! silently dropped) and only that device's metrics are missing from
//! the pass. The cycle completes only when every launched task has
//! been joined; no partial results are published.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::ata::{ByteOrder, DecodeError, IDENTIFY_PAGE_LEN, IdentifyPage, SmartPage};
use crate::drivedb::DriveDb;
use crate::metrics::{MetricSink, Sample, SampleKind};
use crate::scsi::sg::SgioError;
use crate::scsi::{SgDevice, command};

/// Failure of one step of a device probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Sgio(#[from] SgioError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// The two commands a scan needs from a drive.
///
/// The seam exists so the scan pipeline can be driven by scripted fakes
/// in tests; the real implementation is [`AtaDrive`] over SG_IO.
pub trait Drive {
    fn identify(&mut self) -> Result<IdentifyPage, ProbeError>;
    fn smart_read_data(&mut self) -> Result<SmartPage, ProbeError>;
}

/// A real ATA disk behind the sg passthrough transport.
pub struct AtaDrive {
    dev: SgDevice,
    order: ByteOrder,
}

impl Drive for AtaDrive {
    fn identify(&mut self) -> Result<IdentifyPage, ProbeError> {
        let mut buf = [0u8; IDENTIFY_PAGE_LEN];
        self.dev.send_cdb(&command::identify(), &mut buf)?;
        Ok(IdentifyPage::parse(&buf, self.order)?)
    }

    fn smart_read_data(&mut self) -> Result<SmartPage, ProbeError> {
        // The device transfers a full 512-byte sector; only the first 362
        // bytes carry the attribute table.
        let mut buf = [0u8; 512];
        self.dev.send_cdb(&command::smart_read_data(), &mut buf)?;
        Ok(SmartPage::parse(&buf, self.order)?)
    }
}

/// Opens a drive for one scan task.
///
/// Split out from [`Drive`] so tests can inject per-device open failures
/// as well as command failures.
pub trait DriveOpener: Send + Sync + 'static {
    type Drive: Drive;

    fn open(&self, path: &Path) -> io::Result<Self::Drive>;
}

/// Production opener: the device node itself, via SG_IO.
pub struct SgOpener {
    order: ByteOrder,
}

impl DriveOpener for SgOpener {
    type Drive = AtaDrive;

    fn open(&self, path: &Path) -> io::Result<AtaDrive> {
        Ok(AtaDrive {
            dev: SgDevice::open(path)?,
            order: self.order,
        })
    }
}

/// The scan orchestrator. Holds everything a cycle needs; constructed
/// once and re-invoked per scrape.
pub struct Collector<O: DriveOpener = SgOpener> {
    opener: Arc<O>,
    db: Arc<DriveDb>,
    sink: Arc<MetricSink>,
    dev_root: PathBuf,
    disk_pattern: Regex,
}

/// Collector wired to real devices under `/dev`.
pub type DiskCollector = Collector<SgOpener>;

impl DiskCollector {
    pub fn new(db: DriveDb, sink: Arc<MetricSink>) -> Self {
        Collector::with_opener(
            SgOpener {
                order: ByteOrder::host(),
            },
            db,
            sink,
            PathBuf::from("/dev"),
        )
    }
}

impl<O: DriveOpener> Collector<O> {
    fn with_opener(opener: O, db: DriveDb, sink: Arc<MetricSink>, dev_root: PathBuf) -> Self {
        Self {
            opener: Arc::new(opener),
            db: Arc::new(db),
            sink,
            dev_root,
            // Whole-disk nodes only; partitions (sda1) and other node
            // types never support ATA passthrough anyway.
            disk_pattern: Regex::new("^sd[a-z]+$").expect("disk pattern is valid"),
        }
    }

    /// Runs one full Enumerating -> Scanning -> Aggregating pass.
    pub async fn collect(&self) -> Vec<Sample> {
        let disks = match self.enumerate() {
            Ok(disks) => disks,
            Err(err) => {
                warn!(error = %err, "failed to list devices, skipping cycle");
                return Vec::new();
            }
        };
        debug!(candidates = disks.len(), "starting collection cycle");
        self.scan_all(disks).await
    }

    /// Lists candidate whole-disk device names for this cycle.
    fn enumerate(&self) -> io::Result<Vec<String>> {
        let mut disks = Vec::new();
        for entry in std::fs::read_dir(&self.dev_root)? {
            let name = entry?.file_name();
            if let Some(name) = name.to_str()
                && self.disk_pattern.is_match(name)
            {
                disks.push(name.to_owned());
            }
        }
        Ok(disks)
    }

    /// Fans out one blocking task per candidate and joins them all.
    ///
    /// Results come back through the join handles; the only state shared
    /// between tasks is the duration sink. The `await` on the join set is
    /// the aggregation barrier: it returns only after every task launched
    /// this cycle has finished, whatever its outcome.
    async fn scan_all(&self, disks: Vec<String>) -> Vec<Sample> {
        let mut tasks = JoinSet::new();
        for disk in disks {
            let opener = Arc::clone(&self.opener);
            let db = Arc::clone(&self.db);
            let sink = Arc::clone(&self.sink);
            let path = self.dev_root.join(&disk);
            tasks.spawn_blocking(move || {
                let started = Instant::now();
                let samples = scan_disk(opener.as_ref(), &path, &disk, &db);
                sink.observe_scan(started.elapsed());
                samples
            });
        }

        let mut samples = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(disk_samples) => samples.extend(disk_samples),
                Err(err) => warn!(error = %err, "scan task panicked"),
            }
        }
        samples
    }
}

/// Scans a single disk; never propagates failure beyond its own metrics.
fn scan_disk<O: DriveOpener>(opener: &O, path: &Path, disk: &str, db: &DriveDb) -> Vec<Sample> {
    let mut drive = match opener.open(path) {
        Ok(drive) => drive,
        Err(err) => {
            warn!(dev = %disk, error = %err, "failed to open device");
            return Vec::new();
        }
    };
    read_drive(&mut drive, disk, db)
}

/// The per-device pipeline: IDENTIFY, SMART capability gate, SMART READ
/// DATA, attribute emission.
fn read_drive(drive: &mut impl Drive, disk: &str, db: &DriveDb) -> Vec<Sample> {
    // Most non-ATA nodes (USB enclosures, virtio disks, card readers)
    // reject the passthrough CDB outright; that is routine, not a fault
    // worth logging.
    let Ok(id) = drive.identify() else {
        debug!(dev = %disk, "no ATA identify response, skipping");
        return Vec::new();
    };

    if !id.smart_supported() {
        debug!(dev = %disk, "SMART not supported, skipping");
        return Vec::new();
    }

    let page = match drive.smart_read_data() {
        Ok(page) => page,
        Err(err) => {
            warn!(dev = %disk, error = %err, "failed to get SMART data");
            return Vec::new();
        }
    };
    debug!(dev = %disk, version = page.version, "decoded SMART page");

    emit_attributes(disk, &id, &page, db)
}

/// Turns one decoded SMART page into metric samples.
///
/// Every populated attribute slot yields a normalized-value sample; a
/// raw-value sample is added only when the drive database names a
/// conversion rule for the id and the rule produces a real value.
fn emit_attributes(
    disk: &str,
    id: &IdentifyPage,
    page: &SmartPage,
    db: &DriveDb,
) -> Vec<Sample> {
    let model = id.model();
    let serial = id.serial();
    let entry = db.lookup(&model);

    let mut samples = Vec::new();
    for attr in &page.attrs {
        // Id 0 is a padding slot, never a metric.
        if attr.id == 0 {
            continue;
        }

        let preset = entry.presets.get(&attr.id.to_string());
        let attr_name = preset.map(|p| p.name.as_str()).unwrap_or_default();
        let labels = |kind, value| Sample {
            kind,
            dev: disk.to_owned(),
            serial: serial.clone(),
            model: model.clone(),
            family: entry.family.clone(),
            attr_id: attr.id,
            attr_name: attr_name.to_owned(),
            value,
        };

        if let Some(preset) = preset {
            let raw = attr.raw_value(&preset.conv);
            // A negative value is the undecodable sentinel.
            if raw >= 0.0 {
                samples.push(labels(SampleKind::Raw, raw));
            }
        }
        samples.push(labels(SampleKind::Normalized, f64::from(attr.value)));
    }
    samples
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::ata::{SMART_ATTR_COUNT, SmartAttr};
    use crate::drivedb::{AttrPreset, DriveEntry};

    // An identify page claiming model "TESTDISK", serial "SN123", with
    // the SMART-supported bit optionally set.
    fn identify_page(smart: bool) -> IdentifyPage {
        let mut buf = [0u8; IDENTIFY_PAGE_LEN];
        buf[54..62].copy_from_slice(b"ETTSIDKS"); // "TESTDISK" pair-swapped
        buf[20..26].copy_from_slice(b"NS21 3"); // "SN123 " pair-swapped
        if smart {
            buf[170] = 0x01;
        }
        IdentifyPage::parse(&buf, ByteOrder::Little).unwrap()
    }

    fn smart_page(attrs: &[SmartAttr]) -> SmartPage {
        let mut table = [SmartAttr::default(); SMART_ATTR_COUNT];
        table[..attrs.len()].copy_from_slice(attrs);
        SmartPage {
            version: 0x10,
            attrs: table,
        }
    }

    fn test_db() -> DriveDb {
        let mut presets = HashMap::new();
        presets.insert(
            "194".to_owned(),
            AttrPreset {
                name: "Temperature_Celsius".to_owned(),
                conv: "tempminmax".to_owned(),
            },
        );
        presets.insert(
            "1".to_owned(),
            AttrPreset {
                name: "Raw_Read_Error_Rate".to_owned(),
                conv: "raw8".to_owned(),
            },
        );
        let mut entries = HashMap::new();
        entries.insert(
            "TESTDISK".to_owned(),
            DriveEntry {
                family: "Test Family".to_owned(),
                presets,
            },
        );
        DriveDb::from_entries(entries)
    }

    fn attr(id: u8, value: u8, vendor_bytes: [u8; 6]) -> SmartAttr {
        SmartAttr {
            id,
            flags: 0,
            value,
            worst: value,
            vendor_bytes,
            reserved: 0,
        }
    }

    #[test]
    fn id_zero_never_emits() {
        let samples = emit_attributes(
            "sda",
            &identify_page(true),
            &smart_page(&[attr(0, 100, [1, 2, 3, 4, 5, 6])]),
            &test_db(),
        );
        assert!(samples.is_empty());
    }

    #[test]
    fn known_attribute_emits_raw_and_normalized() {
        let samples = emit_attributes(
            "sda",
            &identify_page(true),
            &smart_page(&[attr(194, 95, [0x19, 0, 0, 0, 0, 0])]),
            &test_db(),
        );

        assert_eq!(samples.len(), 2);
        let raw = &samples[0];
        assert_eq!(raw.kind, SampleKind::Raw);
        assert_eq!(raw.value, 25.0);
        assert_eq!(raw.attr_name, "Temperature_Celsius");
        assert_eq!(raw.model, "TESTDISK");
        assert_eq!(raw.serial, "SN123");
        assert_eq!(raw.family, "Test Family");

        let norm = &samples[1];
        assert_eq!(norm.kind, SampleKind::Normalized);
        assert_eq!(norm.value, 95.0);
    }

    #[test]
    fn undecodable_raw_suppresses_only_the_raw_sample() {
        // Attribute 1 is mapped to raw8, which is always undecodable.
        let samples = emit_attributes(
            "sda",
            &identify_page(true),
            &smart_page(&[attr(1, 200, [9, 9, 9, 9, 9, 9])]),
            &test_db(),
        );

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].kind, SampleKind::Normalized);
        assert_eq!(samples[0].value, 200.0);
    }

    #[test]
    fn unmapped_attribute_emits_normalized_with_empty_name() {
        let samples = emit_attributes(
            "sda",
            &identify_page(true),
            &smart_page(&[attr(12, 100, [7, 0, 0, 0, 0, 0])]),
            &test_db(),
        );

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].kind, SampleKind::Normalized);
        assert_eq!(samples[0].attr_name, "");
    }

    // --- fakes for the orchestration tests ---

    enum Script {
        OpenFails,
        IdentifyFails,
        NoSmart,
        ReadFails,
        Healthy,
    }

    struct FakeDrive {
        script: Script,
    }

    fn command_error() -> ProbeError {
        ProbeError::Sgio(SgioError::Command {
            status: 0x02,
            host_status: 0,
            driver_status: 0,
            sense: crate::scsi::sg::SenseData::captured(&[0u8; 32], 0),
        })
    }

    impl Drive for FakeDrive {
        fn identify(&mut self) -> Result<IdentifyPage, ProbeError> {
            match self.script {
                Script::IdentifyFails => Err(command_error()),
                Script::NoSmart => Ok(identify_page(false)),
                _ => Ok(identify_page(true)),
            }
        }

        fn smart_read_data(&mut self) -> Result<SmartPage, ProbeError> {
            match self.script {
                Script::ReadFails => Err(command_error()),
                _ => Ok(smart_page(&[attr(194, 95, [0x19, 0, 0, 0, 0, 0])])),
            }
        }
    }

    struct FakeOpener {
        scripts: Mutex<HashMap<String, Script>>,
    }

    impl DriveOpener for FakeOpener {
        type Drive = FakeDrive;

        fn open(&self, path: &Path) -> io::Result<FakeDrive> {
            let name = path.file_name().unwrap().to_str().unwrap().to_owned();
            let script = self
                .scripts
                .lock()
                .unwrap()
                .remove(&name)
                .expect("unexpected device opened");
            match script {
                Script::OpenFails => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
                script => Ok(FakeDrive { script }),
            }
        }
    }

    fn fake_collector(scripts: Vec<(&str, Script)>) -> (Collector<FakeOpener>, Arc<MetricSink>) {
        let sink = Arc::new(MetricSink::new());
        let opener = FakeOpener {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|(name, s)| (name.to_owned(), s))
                    .collect(),
            ),
        };
        let collector =
            Collector::with_opener(opener, test_db(), Arc::clone(&sink), PathBuf::from("/dev"));
        (collector, sink)
    }

    #[tokio::test]
    async fn failing_devices_do_not_disturb_healthy_ones() {
        let (collector, sink) = fake_collector(vec![
            ("sda", Script::OpenFails),
            ("sdb", Script::IdentifyFails),
            ("sdc", Script::ReadFails),
            ("sdd", Script::Healthy),
            ("sde", Script::Healthy),
        ]);

        let names = ["sda", "sdb", "sdc", "sdd", "sde"]
            .map(String::from)
            .to_vec();
        let samples = collector.scan_all(names).await;

        // Two healthy disks, each one raw + one normalized sample.
        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.dev == "sdd" || s.dev == "sde"));

        // The barrier waited for all five tasks, and each one recorded
        // its duration regardless of outcome.
        let text = sink.render(&samples);
        assert!(text.contains("ata_smart_collector_duration_seconds_count 5"));
    }

    #[tokio::test]
    async fn smartless_device_yields_no_metrics_and_no_errors() {
        let (collector, sink) = fake_collector(vec![("sda", Script::NoSmart)]);
        let samples = collector.scan_all(vec!["sda".to_owned()]).await;
        assert!(samples.is_empty());

        let text = sink.render(&samples);
        assert!(text.contains("ata_smart_collector_duration_seconds_count 1"));
    }

    #[tokio::test]
    async fn empty_candidate_set_completes_immediately() {
        let (collector, _sink) = fake_collector(vec![]);
        assert!(collector.scan_all(Vec::new()).await.is_empty());
    }
}
