use crate::counter::{CounterStore, StateBackend, UnitClass};
use crate::error::{AllocationError, ValidationError};
use crate::identifier::{make_sscc, sequence_block, validate_arp_id, Sscc};

/// Hands out fresh identifiers. The packing and fallback stages only see this seam.
pub trait SsccAllocator {
    fn allocate(&mut self, class: UnitClass) -> Result<Sscc, AllocationError>;

    fn next_box(&mut self) -> Result<Sscc, AllocationError> {
        self.allocate(UnitClass::Box)
    }

    fn next_pallet(&mut self) -> Result<Sscc, AllocationError> {
        self.allocate(UnitClass::Pallet)
    }
}

/// Allocator backed by a [`CounterStore`].
///
/// The allocating-party id and year prefix come from the persisted state
/// unless overridden here. Overrides are validated up front so a bad
/// configuration fails before any counter value is consumed.
pub struct StoreAllocator<'a, B: StateBackend> {
    store: &'a CounterStore<B>,
    arp_id: Option<String>,
    year_prefix: Option<String>,
}

impl<'a, B: StateBackend> StoreAllocator<'a, B> {
    pub fn new(store: &'a CounterStore<B>) -> Self {
        Self { store, arp_id: None, year_prefix: None }
    }

    pub fn with_arp_id(mut self, arp_id: impl Into<String>) -> Result<Self, ValidationError> {
        let arp_id = arp_id.into();
        validate_arp_id(&arp_id)?;
        self.arp_id = Some(arp_id);
        Ok(self)
    }

    pub fn with_year_prefix(mut self, prefix: impl Into<String>) -> Result<Self, ValidationError> {
        let prefix = prefix.into();
        sequence_block(&prefix, 0)?;
        self.year_prefix = Some(prefix);
        Ok(self)
    }
}

impl<B: StateBackend> SsccAllocator for StoreAllocator<'_, B> {
    fn allocate(&mut self, class: UnitClass) -> Result<Sscc, AllocationError> {
        let (seq, state) = self.store.allocate(class)?;
        let arp_id = self.arp_id.as_deref().unwrap_or(&state.arp_id);
        let year_prefix = self.year_prefix.as_deref().unwrap_or(&state.year_prefix);
        // The counter value is burned if composition fails here
        let sscc = make_sscc(arp_id, seq, year_prefix)?;
        log::debug!("{class} sscc {sscc} (seq {seq})");
        Ok(sscc)
    }
}
