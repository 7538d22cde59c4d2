//! RecordStore: record CRUD over a record file.
//!
//! Records keep the RID they were inserted under for their whole life. When
//! an update no longer fits on the record's page, the new version is stored
//! elsewhere and the original slot (the anchor) is overwritten with a
//! forwarding record. Reads follow the forward transparently. A record that
//! moves again has its anchor re-pointed and the stale copy deleted, so a
//! chain never grows past one hop.

use super::constants::SLOT_SIZE;
use super::page::DataPage;
use super::scan::RecordScan;
use crate::disk::{FileHandle, FileKind};
use crate::freespace::PageCounters;
use crate::record::{encode_forward, RecordCodec, Rid, StoredRecord};
use kestrel_common::page::PageNum;
use kestrel_common::{Attribute, CompOp, KestrelError, Result};
use tracing::{debug, trace};

/// Upper bound on forwarding hops followed before a chain is deemed corrupt.
const MAX_FORWARD_HOPS: usize = 16;

/// Record manager over one open record file.
pub struct RecordStore {
    handle: FileHandle,
}

impl RecordStore {
    /// Creates a record store over an open record file.
    pub fn new(handle: FileHandle) -> Result<Self> {
        if handle.kind() != FileKind::Record {
            return Err(KestrelError::InvalidParameter {
                name: "file kind".to_string(),
                value: format!("{:?}", handle.kind()),
            });
        }
        Ok(Self { handle })
    }

    /// Returns the underlying file handle.
    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    /// Returns the page I/O counters of the underlying file.
    pub fn counters(&self) -> PageCounters {
        self.handle.counters()
    }

    /// Number of data pages.
    pub fn num_pages(&self) -> u32 {
        self.handle.num_pages()
    }

    /// Persists the file header and closes the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.handle.close()
    }

    /// Releases the file handle without closing it.
    pub fn into_handle(self) -> FileHandle {
        self.handle
    }

    pub(crate) fn load_page(&mut self, page_num: PageNum) -> Result<DataPage> {
        let bytes = self.handle.read_page(page_num)?;
        DataPage::from_bytes(page_num, bytes)
    }

    fn store_page(&mut self, page_num: PageNum, page: &DataPage) -> Result<()> {
        self.handle.write_page(page_num, &page.to_bytes())?;
        self.handle
            .set_page_space(page_num, page.free_space() as u16)
    }

    /// Loads the page a RID points into, mapping a missing page to `RecordNotFound`.
    fn load_page_of(&mut self, rid: Rid) -> Result<DataPage> {
        match self.load_page(rid.page_num) {
            Err(KestrelError::PageNotFound { .. }) => {
                Err(KestrelError::RecordNotFound(rid.to_string()))
            }
            other => other,
        }
    }

    /// Stores encoded record bytes on a page with room, appending one if needed.
    fn place(&mut self, record: &[u8]) -> Result<Rid> {
        if let Some(page_num) = self.handle.find_free_page(record.len() + SLOT_SIZE) {
            let mut page = self.load_page(page_num)?;
            if page.can_fit(record.len()) {
                let slot = page.insert_record(record)?;
                self.store_page(page_num, &page)?;
                return Ok(Rid::new(page_num, slot as u16));
            }
        }

        let mut page = DataPage::new();
        let slot = page.insert_record(record)?;
        let page_num = self.handle.append_page(&page.to_bytes())?;
        self.handle
            .set_page_space(page_num, page.free_space() as u16)?;
        Ok(Rid::new(page_num, slot as u16))
    }

    /// Inserts a wire tuple and returns its RID.
    pub fn insert(&mut self, schema: &[Attribute], wire: &[u8]) -> Result<Rid> {
        let record = RecordCodec::new(schema)?.encode(wire, false)?;
        let rid = self.place(&record)?;
        trace!(%rid, len = record.len(), "inserted record");
        Ok(rid)
    }

    /// Follows forwarding records from `rid` to the data record.
    ///
    /// Returns the RID where the data lives and its page.
    pub(crate) fn resolve(&mut self, rid: Rid) -> Result<(Rid, DataPage)> {
        let mut current = rid;
        for _ in 0..MAX_FORWARD_HOPS {
            let page = self.load_page_of(current)?;
            let bytes = page
                .get_record(current.slot_num as usize)
                .map_err(|_| KestrelError::RecordNotFound(rid.to_string()))?;
            match StoredRecord::parse(bytes)? {
                StoredRecord::Forward(next) => current = next,
                StoredRecord::Data { .. } => return Ok((current, page)),
            }
        }
        Err(KestrelError::Internal(format!(
            "forwarding chain from {} exceeds {} hops",
            rid, MAX_FORWARD_HOPS
        )))
    }

    /// Reads the current version of a record as a wire tuple.
    pub fn read(&mut self, schema: &[Attribute], rid: Rid) -> Result<Vec<u8>> {
        let codec = RecordCodec::new(schema)?;
        let (live, page) = self.resolve(rid)?;
        codec.decode(page.get_record(live.slot_num as usize)?)
    }

    /// Reads one attribute as a single-attribute wire tuple
    /// (`[null bitmap][value]`).
    pub fn read_attribute(&mut self, schema: &[Attribute], rid: Rid, name: &str) -> Result<Vec<u8>> {
        let codec = RecordCodec::new(schema)?;
        let index = codec.attribute_index(name)?;
        let (live, page) = self.resolve(rid)?;
        codec.project(page.get_record(live.slot_num as usize)?, &[index])
    }

    /// Replaces the record at `rid`. The RID stays valid.
    pub fn update(&mut self, schema: &[Attribute], rid: Rid, wire: &[u8]) -> Result<()> {
        let codec = RecordCodec::new(schema)?;
        let (live, mut page) = self.resolve(rid)?;
        let moved = live != rid;

        let record = codec.encode(wire, moved)?;
        match page.update_record(live.slot_num as usize, &record) {
            Ok(()) => {
                self.store_page(live.page_num, &page)?;
                trace!(%rid, %live, "updated record in place");
                return Ok(());
            }
            Err(KestrelError::PageFull) => {}
            Err(e) => return Err(e),
        }

        // Does not fit where it lives: store a relocated copy elsewhere.
        let record = if moved {
            record
        } else {
            codec.encode(wire, true)?
        };
        let target = self.place(&record)?;

        // Point the anchor at the new copy. Pages are reloaded because
        // placement may have written to them.
        let mut anchor_page = self.load_page_of(rid)?;
        anchor_page.update_record(rid.slot_num as usize, &encode_forward(target))?;
        self.store_page(rid.page_num, &anchor_page)?;

        if moved {
            let mut stale_page = self.load_page(live.page_num)?;
            stale_page.delete_record(live.slot_num as usize)?;
            self.store_page(live.page_num, &stale_page)?;
        }

        debug!(%rid, from = %live, to = %target, "relocated record");
        Ok(())
    }

    /// Deletes the record at `rid` together with any relocated copy.
    ///
    /// Deleting an already deleted record succeeds.
    pub fn delete(&mut self, rid: Rid) -> Result<()> {
        let page = self.load_page_of(rid)?;
        if page.check_record_deleted(rid.slot_num as usize)? {
            return Ok(());
        }

        // Collect the chain, anchor first.
        let mut chain = vec![rid];
        let mut current = rid;
        for _ in 0..MAX_FORWARD_HOPS {
            let page = self.load_page_of(current)?;
            if page.check_record_deleted(current.slot_num as usize)? {
                break;
            }
            match StoredRecord::parse(page.get_record(current.slot_num as usize)?)? {
                StoredRecord::Forward(next) => {
                    chain.push(next);
                    current = next;
                }
                StoredRecord::Data { .. } => break,
            }
        }

        for hop in chain.into_iter().rev() {
            let mut page = self.load_page_of(hop)?;
            if !page.check_record_deleted(hop.slot_num as usize)? {
                page.delete_record(hop.slot_num as usize)?;
                self.store_page(hop.page_num, &page)?;
            }
        }
        trace!(%rid, "deleted record");
        Ok(())
    }

    /// Starts a forward-only scan.
    ///
    /// Records whose `condition_attr` satisfies `op` against the wire-encoded
    /// `value` are returned with only the `projected` attributes. With
    /// `CompOp::NoOp` the condition attribute is ignored and may be empty.
    pub fn scan(
        &self,
        schema: &[Attribute],
        condition_attr: &str,
        op: CompOp,
        value: Option<&[u8]>,
        projected: &[&str],
    ) -> Result<RecordScan> {
        RecordScan::new(schema, condition_attr, op, value, projected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FileManager;
    use crate::record::{decode_tuple, encode_tuple};
    use kestrel_common::{StorageConfig, Value};
    use tempfile::tempdir;

    fn create_test_store() -> (RecordStore, FileManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(StorageConfig::with_data_dir(dir.path())).unwrap();
        fm.create_file("emp.tbl", FileKind::Record).unwrap();
        let handle = fm.open_file("emp.tbl", FileKind::Record).unwrap();
        (RecordStore::new(handle).unwrap(), fm, dir)
    }

    fn schema() -> Vec<Attribute> {
        vec![Attribute::varchar("name", 200), Attribute::int("age")]
    }

    fn tuple(name: &str, age: i32) -> Vec<u8> {
        encode_tuple(&[Some(Value::varchar(name)), Some(Value::Int(age))])
    }

    #[test]
    fn test_rejects_index_file() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(StorageConfig::with_data_dir(dir.path())).unwrap();
        fm.create_file("x.idx", FileKind::Index).unwrap();
        let handle = fm.open_file("x.idx", FileKind::Index).unwrap();
        assert!(RecordStore::new(handle).is_err());
    }

    #[test]
    fn test_insert_read() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();

        let rid = store.insert(&s, &tuple("hello", 5)).unwrap();
        assert_eq!(rid, Rid::new(0, 0));
        assert_eq!(store.read(&s, rid).unwrap(), tuple("hello", 5));

        let rid2 = store.insert(&s, &tuple("world", 6)).unwrap();
        assert_eq!(rid2, Rid::new(0, 1));
        assert_eq!(store.num_pages(), 1);
    }

    #[test]
    fn test_read_missing() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        assert!(matches!(
            store.read(&s, Rid::new(3, 0)),
            Err(KestrelError::RecordNotFound(_))
        ));
        store.insert(&s, &tuple("a", 1)).unwrap();
        assert!(matches!(
            store.read(&s, Rid::new(0, 9)),
            Err(KestrelError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_update_in_place() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        let rid = store.insert(&s, &tuple("short", 1)).unwrap();

        store.update(&s, rid, &tuple("a bit longer now", 2)).unwrap();
        assert_eq!(store.read(&s, rid).unwrap(), tuple("a bit longer now", 2));
        assert_eq!(store.num_pages(), 1);
    }

    #[test]
    fn test_update_relocates_and_keeps_rid() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();

        let first = store.insert(&s, &tuple("x", 0)).unwrap();
        // Fill page 0 so that `first` cannot grow in place.
        let filler = "f".repeat(180);
        while store.num_pages() == 1 {
            store.insert(&s, &tuple(&filler, 1)).unwrap();
        }

        let big = "y".repeat(150);
        store.update(&s, first, &tuple(&big, 7)).unwrap();
        assert_eq!(store.read(&s, first).unwrap(), tuple(&big, 7));

        let page = store.load_page(0).unwrap();
        let raw = page.get_record(0).unwrap();
        assert!(matches!(
            StoredRecord::parse(raw).unwrap(),
            StoredRecord::Forward(target) if target.page_num > 0
        ));
    }

    #[test]
    fn test_second_relocation_collapses_chain() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        let filler = "f".repeat(180);

        let anchor = store.insert(&s, &tuple("x", 0)).unwrap();
        while store.num_pages() == 1 {
            store.insert(&s, &tuple(&filler, 1)).unwrap();
        }
        store.update(&s, anchor, &tuple(&"y".repeat(150), 1)).unwrap();
        let (first_target, _) = store.resolve(anchor).unwrap();

        // Fill the target's page too, then grow again.
        let pages = store.num_pages();
        while store.num_pages() == pages {
            store.insert(&s, &tuple(&filler, 1)).unwrap();
        }
        let huge = "z".repeat(1500);
        store.update(&s, anchor, &tuple(&huge, 2)).unwrap();

        let (second_target, _) = store.resolve(anchor).unwrap();
        assert_ne!(first_target, second_target);
        assert_eq!(store.read(&s, anchor).unwrap(), tuple(&huge, 2));

        // The stale copy is gone and the anchor forwards directly.
        let stale = store.load_page(first_target.page_num).unwrap();
        assert!(stale
            .check_record_deleted(first_target.slot_num as usize)
            .unwrap());
        let anchor_page = store.load_page(anchor.page_num).unwrap();
        assert_eq!(
            StoredRecord::parse(anchor_page.get_record(0).unwrap()).unwrap(),
            StoredRecord::Forward(second_target)
        );
    }

    #[test]
    fn test_update_relocated_record_in_place() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        let anchor = store.insert(&s, &tuple("x", 0)).unwrap();
        while store.num_pages() == 1 {
            store.insert(&s, &tuple(&"f".repeat(180), 1)).unwrap();
        }
        store.update(&s, anchor, &tuple(&"y".repeat(150), 1)).unwrap();
        let (target, _) = store.resolve(anchor).unwrap();

        store.update(&s, anchor, &tuple("tiny", 3)).unwrap();
        let (still, page) = store.resolve(anchor).unwrap();
        assert_eq!(still, target);
        assert_eq!(
            StoredRecord::parse(page.get_record(still.slot_num as usize).unwrap()).unwrap(),
            StoredRecord::Data { relocated: true }
        );
        assert_eq!(store.read(&s, anchor).unwrap(), tuple("tiny", 3));
    }

    #[test]
    fn test_delete_idempotent() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        let rid = store.insert(&s, &tuple("gone", 1)).unwrap();

        store.delete(rid).unwrap();
        assert!(matches!(
            store.read(&s, rid),
            Err(KestrelError::RecordNotFound(_))
        ));
        store.delete(rid).unwrap();
    }

    #[test]
    fn test_delete_forwarded_removes_target() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        let anchor = store.insert(&s, &tuple("x", 0)).unwrap();
        while store.num_pages() == 1 {
            store.insert(&s, &tuple(&"f".repeat(180), 1)).unwrap();
        }
        store.update(&s, anchor, &tuple(&"y".repeat(150), 1)).unwrap();
        let (target, _) = store.resolve(anchor).unwrap();

        store.delete(anchor).unwrap();
        let page = store.load_page(target.page_num).unwrap();
        assert!(page.check_record_deleted(target.slot_num as usize).unwrap());
        assert!(store.read(&s, anchor).is_err());
    }

    #[test]
    fn test_slot_reused_after_delete() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        let a = store.insert(&s, &tuple("a", 1)).unwrap();
        let b = store.insert(&s, &tuple("b", 2)).unwrap();
        store.delete(a).unwrap();

        let c = store.insert(&s, &tuple("c", 3)).unwrap();
        assert_eq!(c, a);
        assert_eq!(store.read(&s, b).unwrap(), tuple("b", 2));
        assert_eq!(store.read(&s, c).unwrap(), tuple("c", 3));
    }

    #[test]
    fn test_read_attribute() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        let rid = store
            .insert(&s, &encode_tuple(&[None, Some(Value::Int(44))]))
            .unwrap();

        let age = store.read_attribute(&s, rid, "age").unwrap();
        assert_eq!(age, vec![0, 44, 0, 0, 0]);
        let name = store.read_attribute(&s, rid, "name").unwrap();
        assert_eq!(name, vec![0x80]);
        assert!(matches!(
            store.read_attribute(&s, rid, "salary"),
            Err(KestrelError::AttributeNotFound(_))
        ));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        let err = store.insert(&s, &tuple(&"q".repeat(5000), 0)).unwrap_err();
        assert!(matches!(err, KestrelError::RecordTooLarge { .. }));
        assert_eq!(store.num_pages(), 0);
    }

    #[test]
    fn test_free_space_reused_across_pages() {
        let (mut store, _fm, _dir) = create_test_store();
        let s = schema();
        // 318 bytes per record with its slot: twelve fill a page.
        let filler = "f".repeat(300);
        let rids: Vec<Rid> = (0..24)
            .map(|_| store.insert(&s, &tuple(&filler, 1)).unwrap())
            .collect();
        assert_eq!(store.num_pages(), 2);

        // Free room on page 0; the next insert lands there, not on a new page.
        store.delete(rids[0]).unwrap();
        store.delete(rids[1]).unwrap();
        let rid = store.insert(&s, &tuple(&filler, 2)).unwrap();
        assert_eq!(rid, Rid::new(0, 0));
        assert_eq!(store.num_pages(), 2);
        assert_eq!(
            decode_tuple(&s, &store.read(&s, rid).unwrap()).unwrap()[1],
            Some(Value::Int(2))
        );
    }

    #[test]
    fn test_persistence_across_reopen() {
        let (mut store, fm, _dir) = create_test_store();
        let s = schema();
        let rid = store.insert(&s, &tuple("durable", 9)).unwrap();
        store.close().unwrap();

        let handle = fm.open_file("emp.tbl", FileKind::Record).unwrap();
        let mut store = RecordStore::new(handle).unwrap();
        assert_eq!(store.read(&s, rid).unwrap(), tuple("durable", 9));
        let next = store.insert(&s, &tuple("more", 1)).unwrap();
        assert_eq!(next, Rid::new(0, 1));
    }
}
