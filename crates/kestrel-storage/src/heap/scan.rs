//! Forward-only filtered and projected scan over a record file.

use super::file::RecordStore;
use super::page::DataPage;
use crate::record::{decode_literal, RecordCodec, Rid, StoredRecord};
use kestrel_common::page::PageNum;
use kestrel_common::{Attribute, CompOp, KestrelError, Result, Value};

/// What the cursor found at its position.
enum Step {
    NextPage,
    Skip,
    Record(Vec<u8>),
    Forward,
}

/// Cursor over the records of a record file, in page-then-slot order.
///
/// The cursor does not borrow the store, so the caller may update or delete
/// the record it just received between calls to `next_record`. Each record
/// is reported once, under its anchor RID; relocated copies are reached
/// through their forwarding record and skipped at their physical position.
pub struct RecordScan {
    schema: Vec<Attribute>,
    /// Condition attribute index, operator and literal. None for `NoOp`.
    condition: Option<(usize, CompOp, Option<Value>)>,
    projection: Vec<usize>,
    page_num: PageNum,
    slot_num: usize,
    /// Page under the cursor and the file's write count when it was read.
    cached: Option<(PageNum, u64, DataPage)>,
    done: bool,
}

impl RecordScan {
    pub(crate) fn new(
        schema: &[Attribute],
        condition_attr: &str,
        op: CompOp,
        value: Option<&[u8]>,
        projected: &[&str],
    ) -> Result<Self> {
        let codec = RecordCodec::new(schema)?;
        let condition = if op == CompOp::NoOp {
            None
        } else {
            let index = codec.attribute_index(condition_attr)?;
            let literal = value
                .map(|v| decode_literal(schema[index].attr_type, v))
                .transpose()?;
            Some((index, op, literal))
        };
        let projection = projected
            .iter()
            .map(|name| codec.attribute_index(name))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            schema: schema.to_vec(),
            condition,
            projection,
            page_num: 0,
            slot_num: 0,
            cached: None,
            done: false,
        })
    }

    /// Loads the current page unless the cached copy is still current.
    fn current_page(&mut self, store: &mut RecordStore) -> Result<&DataPage> {
        let counters = store.counters();
        let version = counters.write as u64 + counters.append as u64;
        let fresh = matches!(&self.cached, Some((p, v, _)) if *p == self.page_num && *v == version);
        if !fresh {
            let page = store.load_page(self.page_num)?;
            self.cached = Some((self.page_num, version, page));
        }
        self.cached
            .as_ref()
            .map(|(_, _, page)| page)
            .ok_or_else(|| KestrelError::Internal("scan page cache is empty".to_string()))
    }

    /// Classifies the slot under the cursor.
    fn step(&mut self, store: &mut RecordStore) -> Result<Step> {
        let slot_num = self.slot_num;
        let page = self.current_page(store)?;
        if slot_num >= page.record_count() {
            return Ok(Step::NextPage);
        }
        if page.check_record_deleted(slot_num)? {
            return Ok(Step::Skip);
        }
        let bytes = page.get_record(slot_num)?;
        Ok(match StoredRecord::parse(bytes)? {
            StoredRecord::Data { relocated: true } => Step::Skip,
            StoredRecord::Data { relocated: false } => Step::Record(bytes.to_vec()),
            StoredRecord::Forward(_) => Step::Forward,
        })
    }

    /// Returns the next matching record as `(anchor RID, projected tuple)`.
    ///
    /// Returns None once the file is exhausted.
    pub fn next_record(&mut self, store: &mut RecordStore) -> Result<Option<(Rid, Vec<u8>)>> {
        while !self.done {
            if self.page_num >= store.num_pages() {
                self.close();
                break;
            }

            let rid = Rid::new(self.page_num, self.slot_num as u16);
            let record = match self.step(store)? {
                Step::NextPage => {
                    self.page_num += 1;
                    self.slot_num = 0;
                    continue;
                }
                Step::Skip => {
                    self.slot_num += 1;
                    continue;
                }
                Step::Record(record) => record,
                Step::Forward => {
                    let (live, live_page) = store.resolve(rid)?;
                    live_page.get_record(live.slot_num as usize)?.to_vec()
                }
            };
            self.slot_num += 1;

            if let Some(tuple) = self.evaluate(&record)? {
                return Ok(Some((rid, tuple)));
            }
        }
        Ok(None)
    }

    /// Applies the condition and projection to one record.
    fn evaluate(&self, record: &[u8]) -> Result<Option<Vec<u8>>> {
        let codec = RecordCodec::new(&self.schema)?;
        if let Some((index, op, literal)) = &self.condition {
            let field = codec.field(record, *index)?;
            if !op.evaluate(field.as_ref(), literal.as_ref()) {
                return Ok(None);
            }
        }
        codec.project(record, &self.projection).map(Some)
    }

    /// Ends the scan. Further calls to `next_record` return None.
    pub fn close(&mut self) {
        self.done = true;
        self.cached = None;
    }

    /// Returns true once the scan is exhausted or closed.
    pub fn is_closed(&self) -> bool {
        self.done
    }

    /// Drives the scan as an iterator that borrows the store.
    pub fn iter(self, store: &mut RecordStore) -> RecordScanIter<'_> {
        RecordScanIter { scan: self, store }
    }
}

/// Borrowing iterator adapter over a `RecordScan`.
pub struct RecordScanIter<'a> {
    scan: RecordScan,
    store: &'a mut RecordStore,
}

impl Iterator for RecordScanIter<'_> {
    type Item = Result<(Rid, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.scan.next_record(self.store) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.scan.close();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{FileKind, FileManager};
    use crate::record::{decode_tuple, encode_tuple};
    use kestrel_common::StorageConfig;
    use tempfile::tempdir;

    fn create_test_store() -> (RecordStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(StorageConfig::with_data_dir(dir.path())).unwrap();
        fm.create_file("scan.tbl", FileKind::Record).unwrap();
        let handle = fm.open_file("scan.tbl", FileKind::Record).unwrap();
        (RecordStore::new(handle).unwrap(), dir)
    }

    fn schema() -> Vec<Attribute> {
        vec![
            Attribute::varchar("name", 200),
            Attribute::int("age"),
            Attribute::real("score"),
        ]
    }

    fn tuple(name: &str, age: Option<i32>, score: f32) -> Vec<u8> {
        encode_tuple(&[
            Some(Value::varchar(name)),
            age.map(Value::Int),
            Some(Value::Real(score)),
        ])
    }

    fn collect(scan: RecordScan, store: &mut RecordStore) -> Vec<(Rid, Vec<u8>)> {
        scan.iter(store).map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_full_scan_projects() {
        let (mut store, _dir) = create_test_store();
        let s = schema();
        for i in 0..5 {
            store
                .insert(&s, &tuple(&format!("n{}", i), Some(i), i as f32))
                .unwrap();
        }

        let scan = store.scan(&s, "", CompOp::NoOp, None, &["age"]).unwrap();
        let rows = collect(scan, &mut store);
        assert_eq!(rows.len(), 5);
        for (i, (rid, wire)) in rows.iter().enumerate() {
            assert_eq!(*rid, Rid::new(0, i as u16));
            assert_eq!(*wire, encode_tuple(&[Some(Value::Int(i as i32))]));
        }
    }

    #[test]
    fn test_scan_with_condition() {
        let (mut store, _dir) = create_test_store();
        let s = schema();
        for i in 0..10 {
            store.insert(&s, &tuple("p", Some(i), 0.0)).unwrap();
        }
        store.insert(&s, &tuple("nullage", None, 0.0)).unwrap();

        let literal = Value::Int(6).to_wire();
        let scan = store
            .scan(&s, "age", CompOp::Ge, Some(&literal), &["age", "name"])
            .unwrap();
        let ages: Vec<Option<Value>> = collect(scan, &mut store)
            .into_iter()
            .map(|(_, wire)| {
                let proj = vec![Attribute::int("age"), Attribute::varchar("name", 200)];
                decode_tuple(&proj, &wire).unwrap()[0].clone()
            })
            .collect();
        assert_eq!(
            ages,
            vec![
                Some(Value::Int(6)),
                Some(Value::Int(7)),
                Some(Value::Int(8)),
                Some(Value::Int(9))
            ]
        );

        // NULL never satisfies a comparison, even `<>`.
        let scan = store
            .scan(&s, "age", CompOp::Ne, Some(&literal), &["name"])
            .unwrap();
        assert_eq!(collect(scan, &mut store).len(), 9);
    }

    #[test]
    fn test_scan_varchar_condition() {
        let (mut store, _dir) = create_test_store();
        let s = schema();
        for name in ["ant", "bee", "cat", "bee"] {
            store.insert(&s, &tuple(name, Some(1), 1.0)).unwrap();
        }
        let literal = Value::varchar("bee").to_wire();
        let scan = store
            .scan(&s, "name", CompOp::Eq, Some(&literal), &["name"])
            .unwrap();
        let rids: Vec<Rid> = collect(scan, &mut store).into_iter().map(|(r, _)| r).collect();
        assert_eq!(rids, vec![Rid::new(0, 1), Rid::new(0, 3)]);
    }

    #[test]
    fn test_scan_skips_deleted_and_yields_relocated_once() {
        let (mut store, _dir) = create_test_store();
        let s = schema();

        let moved = store.insert(&s, &tuple("m", Some(0), 0.0)).unwrap();
        let gone = store.insert(&s, &tuple("g", Some(1), 0.0)).unwrap();
        while store.num_pages() == 1 {
            store
                .insert(&s, &tuple(&"f".repeat(180), Some(2), 0.0))
                .unwrap();
        }
        store.delete(gone).unwrap();
        store
            .update(&s, moved, &tuple(&"M".repeat(300), Some(99), 0.0))
            .unwrap();
        assert!(store.resolve(moved).unwrap().0.page_num > 0);

        let literal = Value::Int(99).to_wire();
        let scan = store
            .scan(&s, "age", CompOp::Eq, Some(&literal), &["age"])
            .unwrap();
        let rows = collect(scan, &mut store);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, moved);

        let scan = store.scan(&s, "", CompOp::NoOp, None, &["age"]).unwrap();
        let rids: Vec<Rid> = collect(scan, &mut store).into_iter().map(|(r, _)| r).collect();
        assert!(!rids.contains(&gone));
        assert_eq!(rids.iter().filter(|r| **r == moved).count(), 1);
    }

    #[test]
    fn test_delete_during_scan() {
        let (mut store, _dir) = create_test_store();
        let s = schema();
        for i in 0..50 {
            store
                .insert(&s, &tuple(&"d".repeat(100), Some(i), 0.0))
                .unwrap();
        }

        let mut scan = store.scan(&s, "", CompOp::NoOp, None, &["age"]).unwrap();
        let mut seen = 0;
        while let Some((rid, _)) = scan.next_record(&mut store).unwrap() {
            store.delete(rid).unwrap();
            seen += 1;
        }
        assert_eq!(seen, 50);

        let scan = store.scan(&s, "", CompOp::NoOp, None, &["age"]).unwrap();
        assert!(collect(scan, &mut store).is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut store, _dir) = create_test_store();
        let s = schema();
        store.insert(&s, &tuple("a", Some(1), 0.0)).unwrap();

        let mut scan = store.scan(&s, "", CompOp::NoOp, None, &["name"]).unwrap();
        scan.close();
        scan.close();
        assert!(scan.is_closed());
        assert!(scan.next_record(&mut store).unwrap().is_none());
    }

    #[test]
    fn test_unknown_attribute() {
        let (store, _dir) = create_test_store();
        let s = schema();
        assert!(matches!(
            store.scan(&s, "height", CompOp::Eq, None, &["name"]).err(),
            Some(KestrelError::AttributeNotFound(_))
        ));
        assert!(store.scan(&s, "", CompOp::NoOp, None, &["zip"]).is_err());
    }
}
