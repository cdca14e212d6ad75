use std::{io::Cursor, sync::Arc};

use crate::{PageId, RecordId, Result, StorageError, TransactionId, Tuple, TupleDesc};

/// Bytes reserved on every page besides the occupancy bitmap and the slots.
/// The layout carries no page-level header, so nothing is reserved.
pub const HEADER_OVERHEAD_BYTES: usize = 0;

/// Number of tuple slots a page can hold.
///
/// Every slot costs its tuple width in bytes plus one bit of the occupancy bitmap:
/// `floor(8 * (page_size - overhead) / (tuple_width * 8 + 1))`.
pub fn slot_capacity(page_size: usize, tuple_width: usize) -> usize {
    let usable_bits = page_size.saturating_sub(HEADER_OVERHEAD_BYTES) * 8;
    usable_bits / (tuple_width * 8 + 1)
}

/// Length in bytes of the occupancy bitmap for `slots` slots
pub fn header_len(slots: usize) -> usize {
    slots.div_ceil(8)
}

/// A fixed-size page of a heap table.
///
/// Layout: `header_len(slots)` bitmap bytes (bit 0 of byte 0 is slot 0, least
/// significant bit first) followed by `slots` fixed-width tuple records.
/// Empty slots and trailing padding are zero on disk.
#[derive(Debug, Clone)]
pub struct HeapPage {
    id: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    dirty: bool,
    dirtier: Option<TransactionId>,
}

impl HeapPage {
    /// A page with every slot empty
    pub fn empty(id: PageId, desc: Arc<TupleDesc>, page_size: usize) -> Self {
        let slot_count = slot_capacity(page_size, desc.byte_width());
        Self {
            id,
            desc,
            page_size,
            header: vec![0; header_len(slot_count)],
            slots: vec![None; slot_count],
            dirty: false,
            dirtier: None,
        }
    }

    /// Bytes of a freshly allocated page
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    /// Deserialize the occupancy bitmap and then the occupied slot records.
    /// `data` must be exactly one page long.
    pub fn read(id: PageId, desc: Arc<TupleDesc>, data: &[u8], page_size: usize) -> Result<Self> {
        if data.len() != page_size {
            return Err(StorageError::CorruptPage {
                page_id: id,
                detail: format!("expected {page_size} bytes, got {}", data.len()),
            });
        }
        let mut page = Self::empty(id, desc, page_size);
        let header_len = page.header.len();
        page.header.copy_from_slice(&data[..header_len]);
        let stray = (page.slots.len()..header_len * 8)
            .find(|slot| page.header[slot / 8] & (1 << (slot % 8)) != 0);
        if let Some(slot) = stray {
            return Err(StorageError::CorruptPage {
                page_id: id,
                detail: format!("occupancy bit {slot} set past the last slot"),
            });
        }

        let width = page.desc.byte_width();
        for slot in 0..page.slots.len() {
            if !page.is_slot_used(slot) {
                continue;
            }
            let start = header_len + slot * width;
            let mut cursor = Cursor::new(&data[start..start + width]);
            let mut tuple = Tuple::read_from(&page.desc, &mut cursor).map_err(|e| {
                StorageError::CorruptPage {
                    page_id: id,
                    detail: format!("slot {slot}: {e}"),
                }
            })?;
            tuple.set_record_id(Some(RecordId::new(id, slot)));
            page.slots[slot] = Some(tuple);
        }
        Ok(page)
    }

    /// Serialize to exactly `page_size` bytes; the inverse of [`HeapPage::read`]
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.page_size);
        data.extend_from_slice(&self.header);
        let width = self.desc.byte_width();
        for slot in &self.slots {
            match slot {
                Some(tuple) => tuple.write_to(&mut data)?,
                None => data.resize(data.len() + width, 0),
            }
        }
        data.resize(self.page_size, 0);
        Ok(data)
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.slots.len() && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn empty_slot_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    /// Store `tuple` in the first free slot, stamp its record id and mark the
    /// page dirtied by `txn`
    pub fn insert_tuple(&mut self, txn: TransactionId, tuple: &mut Tuple) -> Result<()> {
        if !tuple.desc().same_layout(&self.desc) {
            return Err(StorageError::SchemaMismatch(format!(
                "tuple ({}) on {} ({})",
                tuple.desc(),
                self.id,
                self.desc
            )));
        }
        let slot = (0..self.slots.len())
            .find(|slot| !self.is_slot_used(*slot))
            .ok_or(StorageError::PageFull(self.id))?;

        tuple.set_record_id(Some(RecordId::new(self.id, slot)));
        self.set_slot_used(slot, true);
        self.slots[slot] = Some(tuple.with_desc(Arc::clone(&self.desc)));
        self.mark_dirty(Some(txn));
        Ok(())
    }

    /// Free the slot named by the tuple's record id and mark the page dirtied by `txn`
    pub fn delete_tuple(&mut self, txn: TransactionId, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        if record_id.page_id != self.id {
            return Err(StorageError::TupleNotOnThisPage(self.id));
        }
        if !self.is_slot_used(record_id.slot) {
            return Err(StorageError::SlotNotOccupied {
                page_id: self.id,
                slot: record_id.slot,
            });
        }
        self.set_slot_used(record_id.slot, false);
        self.slots[record_id.slot] = None;
        self.mark_dirty(Some(txn));
        Ok(())
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// First occupied slot at or after `from`
    pub fn next_occupied(&self, from: usize) -> Option<(usize, &Tuple)> {
        self.slots
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(slot, tuple)| tuple.as_ref().map(|tuple| (slot, tuple)))
    }

    /// Occupied tuples in increasing slot order
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The transaction that last dirtied this page, if it is dirty
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    /// Record that `txn` modified this page, or with `None` that it now matches disk
    pub fn mark_dirty(&mut self, txn: Option<TransactionId>) {
        self.dirty = txn.is_some();
        self.dirtier = txn;
    }
}

#[cfg(test)]
mod page_tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Field, FieldType};

    const PAGE_SIZE: usize = 4096;
    const TXN: TransactionId = TransactionId(3);

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::from_types(&[FieldType::Int, FieldType::Str(12)]))
    }

    fn tuple(desc: &Arc<TupleDesc>, n: i32) -> Tuple {
        Tuple::new(
            Arc::clone(desc),
            vec![Field::Int(n), Field::Str(format!("row{n}"))],
        )
        .unwrap()
    }

    fn pid() -> PageId {
        PageId::new(1, 0)
    }

    #[test]
    fn test_slot_capacity_formula() {
        //  20 byte tuples on a 4k page: floor(32768 / 161)
        assert_eq!(slot_capacity(4096, 20), 203);
        assert_eq!(header_len(203), 26);
        assert!(header_len(203) + 203 * 20 <= 4096);
        assert_eq!(slot_capacity(4096, 8), 511);
    }

    #[test]
    fn test_read_rejects_wrong_length() {
        let err = HeapPage::read(pid(), desc(), &[0u8; 100], PAGE_SIZE).unwrap_err();
        assert!(matches!(err, StorageError::CorruptPage { .. }));
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let desc = desc();
        let mut page = HeapPage::empty(pid(), Arc::clone(&desc), PAGE_SIZE);
        for n in 0..10 {
            page.insert_tuple(TXN, &mut tuple(&desc, n)).unwrap();
        }
        let third = page.tuple(3).unwrap().clone();
        page.delete_tuple(TXN, &third).unwrap();

        let bytes = page.write().unwrap();
        assert_eq!(bytes.len(), PAGE_SIZE);
        let read = HeapPage::read(pid(), Arc::clone(&desc), &bytes, PAGE_SIZE).unwrap();
        assert_eq!(read.write().unwrap(), bytes);
        assert_eq!(read.empty_slot_count(), page.empty_slot_count());
        assert!(!read.is_slot_used(3));
        let values: Vec<i32> = read
            .iter()
            .map(|t| t.field(0).unwrap().as_int().unwrap())
            .collect();
        assert_eq!(values, vec![0, 1, 2, 4, 5, 6, 7, 8, 9]);
        assert!(!read.is_dirty());
    }

    #[test]
    fn test_bitmap_is_lsb_first() {
        let desc = desc();
        let mut page = HeapPage::empty(pid(), Arc::clone(&desc), PAGE_SIZE);
        page.insert_tuple(TXN, &mut tuple(&desc, 0)).unwrap();
        page.insert_tuple(TXN, &mut tuple(&desc, 1)).unwrap();
        page.insert_tuple(TXN, &mut tuple(&desc, 2)).unwrap();
        let bytes = page.write().unwrap();
        assert_eq!(bytes[0], 0b0000_0111);
    }

    #[test]
    fn test_insert_stamps_record_id_and_dirties() {
        let desc = desc();
        let mut page = HeapPage::empty(pid(), Arc::clone(&desc), PAGE_SIZE);
        let mut t = tuple(&desc, 42);
        page.insert_tuple(TXN, &mut t).unwrap();
        assert_eq!(t.record_id(), Some(RecordId::new(pid(), 0)));
        assert!(page.is_dirty());
        assert_eq!(page.dirtier(), Some(TXN));

        page.mark_dirty(None);
        page.delete_tuple(TransactionId(4), &t).unwrap();
        assert_eq!(page.dirtier(), Some(TransactionId(4)));

        page.mark_dirty(Some(TransactionId(5)));
        assert_eq!(page.dirtier(), Some(TransactionId(5)));
        page.mark_dirty(None);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_insert_then_delete_restores_occupancy() {
        let desc = desc();
        let mut page = HeapPage::empty(pid(), Arc::clone(&desc), PAGE_SIZE);
        page.insert_tuple(TXN, &mut tuple(&desc, 1)).unwrap();
        let before = page.empty_slot_count();
        let mut t = tuple(&desc, 2);
        page.insert_tuple(TXN, &mut t).unwrap();
        assert_eq!(page.empty_slot_count(), before - 1);
        page.delete_tuple(TXN, &t).unwrap();
        assert_eq!(page.empty_slot_count(), before);
    }

    #[test]
    fn test_page_full_exactly_when_no_empty_slots() {
        let desc = desc();
        let mut page = HeapPage::empty(pid(), Arc::clone(&desc), 256);
        let capacity = page.slot_count();
        for n in 0..capacity {
            assert!(page.empty_slot_count() > 0);
            page.insert_tuple(TXN, &mut tuple(&desc, n as i32)).unwrap();
        }
        assert_eq!(page.empty_slot_count(), 0);
        let err = page.insert_tuple(TXN, &mut tuple(&desc, -1)).unwrap_err();
        assert!(matches!(err, StorageError::PageFull(_)));
    }

    #[test]
    fn test_insert_rejects_other_layouts() {
        let mut page = HeapPage::empty(pid(), desc(), PAGE_SIZE);
        let other = Arc::new(TupleDesc::from_types(&[FieldType::Int]));
        let mut t = Tuple::new(other, vec![Field::Int(1)]).unwrap();
        assert!(matches!(
            page.insert_tuple(TXN, &mut t),
            Err(StorageError::SchemaMismatch(_))
        ));
        assert_eq!(page.empty_slot_count(), page.slot_count());
    }

    #[test]
    fn test_delete_errors() {
        let desc = desc();
        let mut page = HeapPage::empty(pid(), Arc::clone(&desc), PAGE_SIZE);
        let mut t = tuple(&desc, 1);
        assert!(matches!(
            page.delete_tuple(TXN, &t),
            Err(StorageError::MissingRecordId)
        ));

        page.insert_tuple(TXN, &mut t).unwrap();
        let mut elsewhere = t.clone();
        elsewhere.set_record_id(Some(RecordId::new(PageId::new(1, 9), 0)));
        assert!(matches!(
            page.delete_tuple(TXN, &elsewhere),
            Err(StorageError::TupleNotOnThisPage(_))
        ));

        page.delete_tuple(TXN, &t).unwrap();
        assert!(matches!(
            page.delete_tuple(TXN, &t),
            Err(StorageError::SlotNotOccupied { slot: 0, .. })
        ));
    }

    #[test]
    fn test_corrupt_slot_is_reported() {
        let desc = desc();
        let mut bytes = HeapPage::empty_page_data(PAGE_SIZE);
        let header = header_len(slot_capacity(PAGE_SIZE, desc.byte_width()));
        bytes[0] = 1;
        //  string length prefix larger than the field width
        bytes[header + 4..header + 8].copy_from_slice(&500u32.to_be_bytes());
        let err = HeapPage::read(pid(), desc, &bytes, PAGE_SIZE).unwrap_err();
        assert!(matches!(err, StorageError::CorruptPage { .. }));
    }

    #[test]
    fn test_iteration_is_restartable_and_ordered() {
        let desc = desc();
        let mut page = HeapPage::empty(pid(), Arc::clone(&desc), PAGE_SIZE);
        for n in [5, 6, 7] {
            page.insert_tuple(TXN, &mut tuple(&desc, n)).unwrap();
        }
        assert_eq!(page.iter().count(), 3);
        assert_eq!(page.iter().count(), 3);
        assert_eq!(page.next_occupied(1).map(|(slot, _)| slot), Some(1));
        assert_eq!(page.next_occupied(3).map(|(slot, _)| slot), None);
    }

    #[test]
    fn test_stored_tuples_take_the_page_layout() {
        let named = Arc::new(TupleDesc::with_names(
            &[FieldType::Int, FieldType::Str(12)],
            &["id", "name"],
        ));
        let mut page = HeapPage::empty(pid(), Arc::clone(&named), PAGE_SIZE);
        let mut unnamed = tuple(&desc(), 9);
        page.insert_tuple(TXN, &mut unnamed).unwrap();
        let stored = page.tuple(0).unwrap();
        assert!(Arc::ptr_eq(stored.desc(), &named));
        assert_eq!(stored.desc().field_name(1), Some("name"));
        assert_eq!(stored.record_id(), unnamed.record_id());
    }

    #[test]
    fn test_read_rejects_bits_past_the_last_slot() {
        //  20 byte tuples give 203 slots, so the last bitmap byte uses 3 bits
        let desc = Arc::new(TupleDesc::from_types(&[FieldType::Int; 5]));
        assert_eq!(slot_capacity(PAGE_SIZE, desc.byte_width()), 203);
        let mut bytes = HeapPage::empty_page_data(PAGE_SIZE);
        bytes[25] = 0xF8;
        let err = HeapPage::read(pid(), Arc::clone(&desc), &bytes, PAGE_SIZE).unwrap_err();
        assert!(matches!(err, StorageError::CorruptPage { .. }));

        bytes[25] = 0x07;
        let page = HeapPage::read(pid(), desc, &bytes, PAGE_SIZE).unwrap();
        assert_eq!(page.empty_slot_count(), 200);
    }
}
