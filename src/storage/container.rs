//! File-backed header container.
//!
//! Holds the Platform, Beam and Gate headers of every live object, keyed by
//! object id. Removal only tombstones a slot; the file shrinks when
//! [`HeaderContainer::compact`] rewrites it.
//!
//! The container is not re-entrant. All calls, compaction included, must come
//! from one thread of control (the server poll loop) or sit behind one lock.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::ContainerConfig;
use crate::core::record::Header;
use crate::error::{constants, Result};
use crate::storage::slot::{
    check_file_header, encode_file_header, encode_slot, slot_offset, tombstone_marker,
    SlotControl, FILE_HEADER_LEN, SLOT_CONTROL_LEN, SLOT_LEN,
};
use crate::utils::metrics::{global_metrics, Timer};

/// Where a header lives in the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotRef {
    offset: u64,
    len: usize,
}

#[derive(Debug)]
pub struct HeaderContainer {
    file: File,
    path: PathBuf,
    save: bool,
    table: HashMap<u64, SlotRef>,
    /// Slots in the file, active or not; new headers go at this index.
    slot_count: u64,
    closed: bool,
}

impl HeaderContainer {
    /// Create a fresh, empty container, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P, save: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&encode_file_header())?;
        file.flush()?;
        debug!(path = %path.display(), "Created header container");
        Ok(Self {
            file,
            path,
            save,
            table: HashMap::new(),
            slot_count: 0,
            closed: false,
        })
    }

    /// Reload a container left by an earlier session.
    ///
    /// Fails when the file is missing or its marker, version or slot size
    /// does not match; the caller then starts from [`HeaderContainer::create`].
    pub fn restore<P: AsRef<Path>>(path: P, save: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut marker = [0u8; FILE_HEADER_LEN];
        file.read_exact(&mut marker)?;
        check_file_header(&marker)?;

        let file_len = file.metadata()?.len();
        let body_len = file_len.saturating_sub(FILE_HEADER_LEN as u64);
        let slot_count = body_len / SLOT_LEN as u64;
        if body_len % SLOT_LEN as u64 != 0 {
            // A crash mid-append leaves a partial slot; the next append overwrites it.
            warn!(
                path = %path.display(),
                trailing = body_len % SLOT_LEN as u64,
                "{}",
                constants::ERR_SLOT_TRUNCATED
            );
        }

        let mut table = HashMap::new();
        let mut slot = vec![0u8; SLOT_LEN];
        for index in 0..slot_count {
            file.read_exact(&mut slot)?;
            let control = SlotControl::parse(&slot)?;
            if !control.active {
                continue;
            }
            control.check()?;
            let len = control.size as usize;
            let header = Header::decode(&slot[SLOT_CONTROL_LEN..SLOT_CONTROL_LEN + len])?;
            let slot_ref = SlotRef {
                offset: slot_offset(index),
                len,
            };
            if table.insert(header.id(), slot_ref).is_some() {
                warn!(id = header.id(), "Duplicate active slot in container, keeping the later one");
            }
        }

        info!(
            path = %path.display(),
            active = table.len(),
            slots = slot_count,
            "Restored header container"
        );
        Ok(Self {
            file,
            path,
            save,
            table,
            slot_count,
            closed: false,
        })
    }

    /// Open the container described by `config`.
    ///
    /// With `restore` set, a missing or corrupt file falls back to a fresh
    /// container. Only a failure to create the file is returned.
    pub fn open(config: &ContainerConfig) -> Result<Self> {
        if config.restore {
            match Self::restore(&config.path, config.save) {
                Ok(container) => return Ok(container),
                Err(e) => warn!(
                    path = %config.path.display(),
                    error = %e,
                    "Container restore failed, starting empty"
                ),
            }
        }
        Self::create(&config.path, config.save)
    }

    /// Store a new header. Returns false without touching the file when the
    /// id is already present.
    pub fn insert(&mut self, header: &Header) -> Result<bool> {
        let id = header.id();
        if self.table.contains_key(&id) {
            debug!(id, "Header already present, insert ignored");
            return Ok(false);
        }
        let offset = slot_offset(self.slot_count);
        let len = self.write_slot(offset, header)?;
        self.slot_count += 1;
        self.table.insert(id, SlotRef { offset, len });
        Ok(true)
    }

    /// Overwrite the header with the same id, or insert it.
    ///
    /// Returns true when the id was already present.
    pub fn update(&mut self, header: &Header) -> Result<bool> {
        let id = header.id();
        match self.table.get(&id).copied() {
            Some(slot) => {
                let len = self.write_slot(slot.offset, header)?;
                self.table.insert(id, SlotRef { offset: slot.offset, len });
                Ok(true)
            }
            None => {
                self.insert(header)?;
                Ok(false)
            }
        }
    }

    /// Tombstone the slot for `id`. Returns false when the id is absent.
    pub fn remove(&mut self, id: u64) -> Result<bool> {
        let Some(slot) = self.table.get(&id).copied() else {
            return Ok(false);
        };
        self.file.seek(SeekFrom::Start(slot.offset))?;
        self.file.write_all(&tombstone_marker())?;
        self.table.remove(&id);
        Ok(true)
    }

    pub fn retrieve(&self, id: u64) -> Result<Option<Header>> {
        match self.table.get(&id) {
            Some(slot) => self.read_slot(*slot).map(Some),
            None => Ok(None),
        }
    }

    /// Visit every active header once, in unspecified order.
    pub fn traverse<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Header),
    {
        for slot in self.table.values() {
            let header = self.read_slot(*slot)?;
            visitor(&header);
        }
        Ok(())
    }

    /// All active headers, read in file order.
    pub fn snapshot(&self) -> Result<Vec<Header>> {
        let mut slots: Vec<SlotRef> = self.table.values().copied().collect();
        slots.sort_by_key(|s| s.offset);
        slots.into_iter().map(|s| self.read_slot(s)).collect()
    }

    /// Rewrite the file without tombstoned slots.
    ///
    /// The new file is built beside the old one and renamed over it, so a
    /// crash leaves either the old or the new file intact. Returns the
    /// number of slots reclaimed.
    pub fn compact(&mut self) -> Result<u64> {
        let _timer = Timer::start("container_compact");
        let reclaimed = self.tombstones();
        if reclaimed == 0 {
            return Ok(0);
        }

        let mut live: Vec<(u64, SlotRef)> = self.table.iter().map(|(id, s)| (*id, *s)).collect();
        live.sort_by_key(|(_, s)| s.offset);

        let temp_path = self.temp_path();
        let mut temp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        temp.write_all(&encode_file_header())?;

        let mut slot = vec![0u8; SLOT_LEN];
        let mut table = HashMap::with_capacity(live.len());
        for (index, (id, old)) in live.into_iter().enumerate() {
            self.file.seek(SeekFrom::Start(old.offset))?;
            self.file.read_exact(&mut slot)?;
            temp.write_all(&slot)?;
            table.insert(
                id,
                SlotRef {
                    offset: slot_offset(index as u64),
                    len: old.len,
                },
            );
        }
        temp.sync_all()?;
        drop(temp);

        fs::rename(&temp_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.slot_count = table.len() as u64;
        self.table = table;

        global_metrics().compaction();
        debug!(reclaimed, active = self.table.len(), "Compacted header container");
        Ok(reclaimed)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.table.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.table.keys().copied().collect()
    }

    /// Slots that compaction would reclaim.
    pub fn tombstones(&self) -> u64 {
        self.slot_count - self.table.len() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> bool {
        self.save
    }

    /// Flush and release the container, deleting the file unless `save` is set.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.save {
            self.file.sync_all()?;
        } else {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".compact");
        self.path.with_file_name(name)
    }

    fn write_slot(&mut self, offset: u64, header: &Header) -> Result<usize> {
        let record = header.encode();
        let slot = encode_slot(header.record_type(), &record)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&slot)?;
        Ok(record.len())
    }

    fn read_slot(&self, slot: SlotRef) -> Result<Header> {
        let mut buf = vec![0u8; SLOT_CONTROL_LEN + slot.len];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(slot.offset))?;
        file.read_exact(&mut buf)?;
        Header::decode(&buf[SLOT_CONTROL_LEN..])
    }
}

impl Drop for HeaderContainer {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(path = %self.path.display(), error = %e, "Failed to release header container");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::record::{BeamHeader, GateHeader, ObjectState, PlatformHeader};
    use tempfile::tempdir;

    fn platform(id: u64, callsign: &str) -> Header {
        PlatformHeader::new(id, callsign).into()
    }

    #[test]
    fn test_insert_then_retrieve() {
        let dir = tempdir().unwrap();
        let mut c = HeaderContainer::create(dir.path().join("h.dat"), false).unwrap();
        let h = platform(1, "ALPHA");
        assert!(c.insert(&h).unwrap());
        assert_eq!(c.retrieve(1).unwrap(), Some(h));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let dir = tempdir().unwrap();
        let mut c = HeaderContainer::create(dir.path().join("h.dat"), false).unwrap();
        assert!(c.insert(&platform(1, "FIRST")).unwrap());
        assert!(!c.insert(&platform(1, "SECOND")).unwrap());
        assert_eq!(c.retrieve(1).unwrap().unwrap().callsign(), "FIRST");
        assert_eq!(c.tombstones(), 0);
    }

    #[test]
    fn test_update_reports_presence() {
        let dir = tempdir().unwrap();
        let mut c = HeaderContainer::create(dir.path().join("h.dat"), false).unwrap();
        assert!(!c.update(&platform(5, "NEW")).unwrap());

        let mut changed = PlatformHeader::new(5, "RENAMED");
        changed.state = ObjectState::Off;
        assert!(c.update(&changed.clone().into()).unwrap());
        assert_eq!(c.retrieve(5).unwrap(), Some(Header::Platform(changed)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_update_can_change_kind_in_place() {
        let dir = tempdir().unwrap();
        let mut c = HeaderContainer::create(dir.path().join("h.dat"), false).unwrap();
        c.insert(&platform(9, "P")).unwrap();
        let gate: Header = GateHeader::new(9, 3, "G").into();
        assert!(c.update(&gate).unwrap());
        assert_eq!(c.retrieve(9).unwrap(), Some(gate));
    }

    #[test]
    fn test_remove_is_lazy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.dat");
        let mut c = HeaderContainer::create(&path, false).unwrap();
        c.insert(&platform(1, "A")).unwrap();
        c.insert(&platform(2, "B")).unwrap();
        let before = fs::metadata(&path).unwrap().len();

        assert!(c.remove(1).unwrap());
        assert!(!c.remove(1).unwrap());
        assert_eq!(c.retrieve(1).unwrap(), None);
        assert_eq!(fs::metadata(&path).unwrap().len(), before);
        assert_eq!(c.tombstones(), 1);
    }

    #[test]
    fn test_compact_reclaims_tombstones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.dat");
        let mut c = HeaderContainer::create(&path, false).unwrap();
        for id in 1..=4 {
            c.insert(&platform(id, "X")).unwrap();
        }
        c.insert(&BeamHeader::new(10, 4, "B").into()).unwrap();
        c.remove(2).unwrap();
        c.remove(3).unwrap();

        assert_eq!(c.compact().unwrap(), 2);
        assert_eq!(c.tombstones(), 0);
        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            (FILE_HEADER_LEN + 3 * SLOT_LEN) as u64
        );
        let mut ids = c.ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 4, 10]);
        assert_eq!(c.retrieve(10).unwrap().unwrap().host_id(), Some(4));

        // Appends after compaction land after the surviving slots.
        c.insert(&platform(11, "Y")).unwrap();
        assert_eq!(c.retrieve(11).unwrap().unwrap().callsign(), "Y");
        assert_eq!(c.retrieve(1).unwrap().unwrap().callsign(), "X");
    }

    #[test]
    fn test_compact_without_tombstones_is_noop() {
        let dir = tempdir().unwrap();
        let mut c = HeaderContainer::create(dir.path().join("h.dat"), false).unwrap();
        c.insert(&platform(1, "A")).unwrap();
        assert_eq!(c.compact().unwrap(), 0);
    }

    #[test]
    fn test_traverse_visits_each_active_once() {
        let dir = tempdir().unwrap();
        let mut c = HeaderContainer::create(dir.path().join("h.dat"), false).unwrap();
        for id in 0..20 {
            c.insert(&platform(id, "T")).unwrap();
        }
        for id in (0..20).step_by(3) {
            c.remove(id).unwrap();
        }
        let mut seen = Vec::new();
        c.traverse(|h| seen.push(h.id())).unwrap();
        seen.sort_unstable();
        let expected: Vec<u64> = (0..20).filter(|id| id % 3 != 0).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_close_deletes_scratch_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.dat");
        let c = HeaderContainer::create(&path, false).unwrap();
        c.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_keeps_saved_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.dat");
        {
            let mut c = HeaderContainer::create(&path, true).unwrap();
            c.insert(&platform(1, "KEEP")).unwrap();
        }
        assert!(path.exists());
        let restored = HeaderContainer::restore(&path, true).unwrap();
        assert_eq!(restored.retrieve(1).unwrap().unwrap().callsign(), "KEEP");
    }

    #[test]
    fn test_restore_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(HeaderContainer::restore(dir.path().join("absent.dat"), false).is_err());
    }

    #[test]
    fn test_open_falls_back_on_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.dat");
        fs::write(&path, b"not a container").unwrap();
        let config = ContainerConfig {
            path: path.clone(),
            save: false,
            restore: true,
        };
        let c = HeaderContainer::open(&config).unwrap();
        assert!(c.is_empty());
    }
}
