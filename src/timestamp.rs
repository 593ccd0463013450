//! Timestamps as opaque comparable instants.
//!
//! Wraps the mtime of a file, at nanosecond resolution where the filesystem
//! provides it.  Comparisons treat equal instants as "equal, not older", so
//! a rebuild is only triggered by strictly older targets.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    sec: i64,
    nsec: u32,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        // The clock can in principle predate the epoch; saturate rather
        // than panic on such systems.
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp {
                sec: d.as_secs() as i64,
                nsec: d.subsec_nanos(),
            },
            Err(_) => Timestamp { sec: 0, nsec: 0 },
        }
    }

    pub fn of_metadata(meta: &Metadata) -> Timestamp {
        Timestamp {
            sec: meta.mtime(),
            nsec: meta.mtime_nsec() as u32,
        }
    }

    pub fn format(&self) -> String {
        format!("{}.{:09}", self.sec, self.nsec)
    }
}
