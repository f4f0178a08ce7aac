use crate::{
    DeviceAddress, FamilySet, OneWire, OneWireError, OneWireResult, OneWireStatus,
    consts::{ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_SEARCH_CMD},
    utils::{OneWireCrc, bit_at, set_bit_at},
};

/// Cursor of a [1-Wire ROM search](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html).
///
/// Holds the discrepancy bookkeeping between search rounds, the address found by the
/// last successful round, and the search options (alarm-only, no-reset, family filters).
/// Option changes take effect on the next search round.
///
/// A round is either run bit by bit against a [`OneWire`] bus master with [`search`](Self::search),
/// or by a bus master with its own search hardware, which reads the branch choices from
/// [`direction`](Self::direction) and hands the result back through [`accept`](Self::accept).
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    last_discrepancy: u8,
    last_family_discrepancy: u8,
    last_device: bool,
    rom: [u8; 8],
    alarm_only: bool,
    skip_reset: bool,
    include: FamilySet,
    exclude: FamilySet,
}

impl SearchState {
    /// A fresh search over all devices.
    pub const fn new() -> Self {
        Self {
            last_discrepancy: 0,
            last_family_discrepancy: 0,
            last_device: false,
            rom: [0; 8],
            alarm_only: false,
            skip_reset: false,
            include: FamilySet::new(),
            exclude: FamilySet::new(),
        }
    }

    /// Address found by the last successful round.
    pub fn address(&self) -> DeviceAddress {
        DeviceAddress::new(self.rom)
    }

    /// Bit position (1-64) of the last branch where 0 was taken, 0 when none is left.
    pub fn last_discrepancy(&self) -> u8 {
        self.last_discrepancy
    }

    /// Like [`last_discrepancy`](Self::last_discrepancy), restricted to the family code byte.
    pub fn last_family_discrepancy(&self) -> u8 {
        self.last_family_discrepancy
    }

    /// Whether the last round found the last device on the bus.
    pub fn is_last_device(&self) -> bool {
        self.last_device
    }

    /// Whether only alarming devices are searched.
    pub fn alarm_only(&self) -> bool {
        self.alarm_only
    }

    /// Whether rounds skip the reset pulse.
    pub fn skip_reset(&self) -> bool {
        self.skip_reset
    }

    /// ROM command starting a round.
    pub fn search_command(&self) -> u8 {
        if self.alarm_only {
            ONEWIRE_CONDITIONAL_SEARCH_CMD
        } else {
            ONEWIRE_SEARCH_CMD
        }
    }

    /// Search only devices in alarm state.
    pub fn set_search_only_alarming(&mut self) {
        self.alarm_only = true;
    }

    /// Start rounds without a reset pulse.
    pub fn set_no_reset_search(&mut self) {
        self.skip_reset = true;
    }

    /// Search every device, with a reset pulse before each round.
    pub fn set_search_all_devices(&mut self) {
        self.alarm_only = false;
        self.skip_reset = false;
    }

    /// Drop both family filters.
    pub fn target_all_families(&mut self) {
        self.include.clear();
        self.exclude.clear();
    }

    /// Report only devices of these families.
    pub fn target_family(&mut self, families: &[u8]) {
        self.include = FamilySet::from_slice(families);
    }

    /// Never report devices of these families.
    pub fn exclude_family(&mut self, families: &[u8]) {
        self.exclude = FamilySet::from_slice(families);
    }

    /// Whether a device of `family` passes the include and exclude filters.
    pub fn includes(&self, family: u8) -> bool {
        !self.exclude.contains(family) && (self.include.is_empty() || self.include.contains(family))
    }

    /// Restart the search from the first device.
    pub fn reset(&mut self) {
        self.last_discrepancy = 0;
        self.last_family_discrepancy = 0;
        self.last_device = false;
    }

    /// Branch to take at bit `position` (1-64) when devices disagree.
    ///
    /// Below the last discrepancy the previous path is retraced, at the last discrepancy
    /// the 1 branch is taken, and past it the 0 branch.
    pub fn direction(&self, position: u8) -> bool {
        if position < self.last_discrepancy {
            bit_at(&self.rom, (position - 1) as usize)
        } else {
            position == self.last_discrepancy
        }
    }

    /// Prepare a round. Returns `false` and restarts the cursor when the previous
    /// round already found the last device.
    pub fn begin_round(&mut self) -> bool {
        if self.last_device {
            self.reset();
            false
        } else {
            true
        }
    }

    /// Finish a round with the 64 bits it produced.
    ///
    /// `last_zero` and `family_zero` are the last positions where devices disagreed
    /// and the 0 branch was taken, over the whole address and within the family byte.
    /// Returns `false`, restarting the cursor, when the address fails its CRC or has a
    /// zero family code.
    pub fn accept(&mut self, rom: [u8; 8], last_zero: u8, family_zero: u8) -> bool {
        if rom[0] == 0 || !OneWireCrc::validate(&rom) {
            self.reset();
            return false;
        }
        self.rom = rom;
        self.last_discrepancy = last_zero;
        self.last_family_discrepancy = family_zero;
        self.last_device = last_zero == 0;
        true
    }

    /// Run one search round bit by bit.
    ///
    /// Family filters are not applied here, see [`find_next_with`](Self::find_next_with).
    ///
    /// # Returns
    /// `true` if a device was found, its address is then available from [`address`](Self::address).
    /// `false` when the search is exhausted, nobody answered the reset, or the round
    /// produced an invalid address.
    pub fn search<T: OneWire + ?Sized>(
        &mut self,
        onewire: &mut T,
    ) -> OneWireResult<bool, T::BusError> {
        if !self.begin_round() {
            return Ok(false);
        }
        if !self.skip_reset && !onewire.reset()?.presence() {
            self.reset();
            return Ok(false);
        }
        onewire.write_byte(self.search_command())?;
        let mut rom = [0u8; 8];
        let mut crc = OneWireCrc::default();
        let mut last_zero = 0;
        let mut family_zero = 0;
        for position in 1..=64u8 {
            let (id_bit, complement_bit, taken) = Self::triplet(onewire, self.direction(position))?;
            if id_bit && complement_bit {
                // nobody answered this slot
                self.reset();
                return Ok(false);
            }
            if !id_bit && !complement_bit && !taken {
                last_zero = position;
                if position < 9 {
                    family_zero = position;
                }
            }
            set_bit_at(&mut rom, (position - 1) as usize, taken);
            if position % 8 == 0 {
                crc.update(rom[(position / 8 - 1) as usize]);
            }
        }
        if crc.value() != 0 {
            self.reset();
            return Ok(false);
        }
        Ok(self.accept(rom, last_zero, family_zero))
    }

    fn triplet<T: OneWire + ?Sized>(
        onewire: &mut T,
        direction: bool,
    ) -> OneWireResult<(bool, bool, bool), T::BusError> {
        #[cfg(feature = "triplet-read")]
        match onewire.read_triplet(direction) {
            Ok(triplet) => return Ok(triplet),
            Err(OneWireError::Unimplemented) => {}
            Err(e) => return Err(e),
        }
        let id_bit = onewire.read_bit()?;
        let complement_bit = onewire.read_bit()?;
        if id_bit && complement_bit {
            return Ok((true, true, true));
        }
        let taken = if id_bit != complement_bit {
            id_bit
        } else {
            direction
        };
        onewire.write_bit(taken)?;
        Ok((id_bit, complement_bit, taken))
    }

    /// Find the next device passing the family filters.
    ///
    /// `round` runs one search round on this state, either [`search`](Self::search) or a
    /// bus master specific accelerated round. Devices rejected by the filters are skipped
    /// by jumping to the last family discrepancy, so a rejected family is walked only once.
    /// With exactly one included family and nothing excluded, a fresh search starts
    /// directly at that family.
    pub fn find_next_with<F, E>(&mut self, mut round: F) -> Result<bool, E>
    where
        F: FnMut(&mut Self) -> Result<bool, E>,
    {
        if self.last_discrepancy == 0 && !self.last_device && self.exclude.is_empty() {
            if let Some(family) = self.include.single() {
                self.rom = [family, 0, 0, 0, 0, 0, 0, 0];
                self.last_discrepancy = 64;
            }
        }
        loop {
            if !round(self)? {
                return Ok(false);
            }
            if self.includes(self.rom[0]) {
                return Ok(true);
            }
            if !self.last_device && self.last_family_discrepancy != 0 {
                self.last_discrepancy = self.last_family_discrepancy;
                self.last_family_discrepancy = 0;
            } else {
                self.reset();
                return Ok(false);
            }
        }
    }

    /// Restart the search and find the first device passing the family filters.
    pub fn find_first_with<F, E>(&mut self, round: F) -> Result<bool, E>
    where
        F: FnMut(&mut Self) -> Result<bool, E>,
    {
        self.reset();
        self.find_next_with(round)
    }

    /// Check whether `address` answers a search round.
    ///
    /// The round is steered along `address`; it only comes back with the same address
    /// when that device is on the bus. The cursor is restarted afterwards.
    pub fn verify_with<F, E>(&mut self, address: DeviceAddress, mut round: F) -> Result<bool, E>
    where
        F: FnMut(&mut Self) -> Result<bool, E>,
    {
        self.reset();
        self.rom = address.into();
        self.last_discrepancy = 64;
        let found = round(self)? && self.rom == *address.as_bytes();
        self.reset();
        Ok(found)
    }
}

/// A structure for searching devices on a 1-Wire bus.
/// This structure pairs a [`SearchState`] with a bus master for the common case of
/// walking the bus from start to end.
pub struct OneWireSearch<'a, T> {
    onewire: &'a mut T,
    state: SearchState,
}

#[repr(u8)]
/// Type of search performed using [`OneWireSearch`].
pub enum OneWireSearchKind {
    /// Normal search
    Normal = ONEWIRE_SEARCH_CMD,
    /// Search only for devices with alarm
    Alarmed = ONEWIRE_CONDITIONAL_SEARCH_CMD,
}

impl<'a, T> OneWireSearch<'a, T> {
    /// Creates a new [`OneWireSearch`] instance.
    ///
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `kind` - Whether to search every device or only devices in alarm state.
    pub fn new(onewire: &'a mut T, kind: OneWireSearchKind) -> Self {
        let mut state = SearchState::new();
        if let OneWireSearchKind::Alarmed = kind {
            state.set_search_only_alarming();
        }
        Self { onewire, state }
    }

    /// Creates a new [`OneWireSearch`] instance reporting only one device family.
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `kind` - Whether to search every device or only devices in alarm state.
    /// * `family` - The family code of the devices to search for.
    pub fn with_family(onewire: &'a mut T, kind: OneWireSearchKind, family: u8) -> Self {
        let mut search = Self::new(onewire, kind);
        search.state.target_family(&[family]);
        search
    }

    /// Search cursor.
    pub fn state(&self) -> &SearchState {
        &self.state
    }
}

impl<T: OneWire> OneWireSearch<'_, T> {
    /// Finds the next device on the 1-Wire bus.
    ///
    /// Returns `None` once every device has been reported; the following call starts over.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<DeviceAddress>, OneWireError<T::BusError>> {
        let onewire = &mut *self.onewire;
        if self.state.find_next_with(|state| state.search(onewire))? {
            Ok(Some(self.state.address()))
        } else {
            Ok(None)
        }
    }

    /// Verifies if the device with the given ROM code is present on the 1-Wire bus.
    ///
    /// The search state is restarted, calling [next](OneWireSearch::next) after this call starts a new search.
    pub fn verify(&mut self, rom: DeviceAddress) -> Result<bool, OneWireError<T::BusError>> {
        let onewire = &mut *self.onewire;
        self.state.verify_with(rom, |state| state.search(onewire))
    }
}

/// Data block for a strong-access presence check of `address`.
///
/// Sent right after a Search ROM command, the block answers every triplet of the search
/// with the bits of `address`, so only that device stays on line.
pub fn strong_access_block(address: &DeviceAddress) -> [u8; 24] {
    let mut block = [0xff; 24];
    for i in 0..64 {
        set_bit_at(&mut block, i * 3 + 2, bit_at(address.as_bytes(), i));
    }
    block
}

/// Evaluate the bus response to [`strong_access_block`].
///
/// The device is present when the last eight triplets show it alone on the bus
/// driving the expected bits.
pub fn strong_access_matches(address: &DeviceAddress, response: &[u8; 24]) -> bool {
    let mut good_bits = 0;
    for (i, rom_index) in (168..192).step_by(3).zip(56..64) {
        let tst = ((bit_at(response, i) as u8) << 1) | bit_at(response, i + 1) as u8;
        if tst == 3 {
            // no device
            return false;
        }
        let expected = bit_at(address.as_bytes(), rom_index);
        if (expected && tst == 2) || (!expected && tst == 1) {
            good_bits += 1;
        }
    }
    good_bits >= 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::{collections::BTreeSet, vec::Vec};

    fn random_population(rng: &mut StdRng, count: usize, families: &[u8]) -> Vec<DeviceAddress> {
        let mut set = BTreeSet::new();
        while set.len() < count {
            let family = families[rng.random_range(0..families.len())];
            set.insert(DeviceAddress::from_parts(family, rng.random()));
        }
        set.into_iter().collect()
    }

    fn enumerate(bus: &mut SimBus, state: &mut SearchState) -> Vec<DeviceAddress> {
        let mut found = Vec::new();
        let mut more = state.find_first_with(|s| s.search(&mut *bus)).unwrap();
        while more {
            found.push(state.address());
            more = state.find_next_with(|s| s.search(&mut *bus)).unwrap();
        }
        found
    }

    #[test]
    fn enumerates_random_populations_exactly_once() {
        let mut rng = StdRng::seed_from_u64(0x0123_4567);
        for count in [1, 2, 3, 17, 64] {
            let mut population = random_population(&mut rng, count, &[0x10, 0x28, 0x3a, 0x01]);
            let mut bus = SimBus::new();
            // insertion order must not matter
            population.reverse();
            population.iter().for_each(|a| bus.add(*a));
            let mut state = SearchState::new();
            let found = enumerate(&mut bus, &mut state);
            assert_eq!(found.len(), count);
            let unique: BTreeSet<_> = found.iter().copied().collect();
            assert_eq!(unique.len(), count);
            assert!(found.iter().all(|a| population.contains(a) && a.is_valid()));
            assert!(state.last_discrepancy() == 0);
        }
    }

    #[test]
    fn last_device_flag_set_on_final_device() {
        let mut rng = StdRng::seed_from_u64(7);
        let population = random_population(&mut rng, 5, &[0x28]);
        let mut bus = SimBus::with_devices(population.iter().copied());
        let mut state = SearchState::new();
        let mut seen = 0;
        let mut more = state.find_first_with(|s| s.search(&mut bus)).unwrap();
        while more {
            seen += 1;
            assert_eq!(state.is_last_device(), seen == population.len());
            more = state.find_next_with(|s| s.search(&mut bus)).unwrap();
        }
        assert_eq!(seen, population.len());
        // exhausted search restarts on the next call
        assert!(state.find_next_with(|s| s.search(&mut bus)).unwrap());
    }

    #[test]
    fn single_bit_discrepancy_is_deterministic() {
        let base = DeviceAddress::from_parts(0x28, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let other = DeviceAddress::from_parts(0x28, [0x11, 0x22, 0x37, 0x44, 0x55, 0x66]);
        let mut bus = SimBus::with_devices([base, other]);
        let mut state = SearchState::new();
        let first = enumerate(&mut bus, &mut state);
        assert_eq!(first.len(), 2);
        // 0 branch first: the address with bit 26 clear comes out first
        assert_eq!(first[0], base);
        for _ in 0..3 {
            assert_eq!(enumerate(&mut bus, &mut state), first);
        }
    }

    #[test]
    fn family_filters() {
        let mut rng = StdRng::seed_from_u64(42);
        let population = random_population(&mut rng, 24, &[0x10, 0x28]);
        let mut bus = SimBus::with_devices(population.iter().copied());
        let mut state = SearchState::new();

        state.target_family(&[0x10]);
        let found = enumerate(&mut bus, &mut state);
        let expected: Vec<_> = population.iter().filter(|a| a.family() == 0x10).copied().collect();
        assert_eq!(found.len(), expected.len());
        assert!(found.iter().all(|a| a.family() == 0x10));

        state.target_all_families();
        state.exclude_family(&[0x10]);
        let found = enumerate(&mut bus, &mut state);
        assert_eq!(found.len(), population.len() - expected.len());
        assert!(found.iter().all(|a| a.family() != 0x10));
    }

    #[test]
    fn target_family_absent_ends_search() {
        let population = [
            DeviceAddress::from_parts(0x28, [1, 0, 0, 0, 0, 0]),
            DeviceAddress::from_parts(0x28, [2, 0, 0, 0, 0, 0]),
        ];
        let mut bus = SimBus::with_devices(population);
        let mut state = SearchState::new();
        state.target_family(&[0x10]);
        assert!(!state.find_first_with(|s| s.search(&mut bus)).unwrap());
    }

    #[test]
    fn alarm_search_reports_only_alarming_devices() {
        let quiet = DeviceAddress::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        let loud = DeviceAddress::from_parts(0x28, [6, 5, 4, 3, 2, 1]);
        let mut bus = SimBus::with_devices([quiet]);
        bus.add_alarming(loud);
        let mut state = SearchState::new();
        state.set_search_only_alarming();
        assert_eq!(enumerate(&mut bus, &mut state), [loud]);
    }

    #[test]
    fn empty_bus_reports_nothing() {
        let mut bus = SimBus::new();
        let mut state = SearchState::new();
        assert!(!state.find_first_with(|s| s.search(&mut bus)).unwrap());
        assert_eq!(state.last_discrepancy(), 0);
    }

    #[test]
    fn accepted_addresses_fail_crc_after_any_bit_flip() {
        let mut rng = StdRng::seed_from_u64(99);
        let population = random_population(&mut rng, 8, &[0x10, 0x28]);
        let mut bus = SimBus::with_devices(population.iter().copied());
        let mut state = SearchState::new();
        for address in enumerate(&mut bus, &mut state) {
            let bytes: [u8; 8] = address.into();
            assert_eq!(OneWireCrc::compute(&bytes[..7]), bytes[7]);
            for i in 0..64 {
                let mut corrupted = bytes;
                corrupted[i / 8] ^= 1 << (i % 8);
                assert!(!OneWireCrc::validate(&corrupted));
            }
        }
    }

    #[test]
    fn accept_rejects_bad_addresses() {
        let mut state = SearchState::new();
        let good: [u8; 8] = DeviceAddress::from_parts(0x28, [9; 6]).into();
        let mut bad = good;
        bad[3] ^= 0x10;
        assert!(!state.accept(bad, 5, 0));
        assert!(!state.accept([0; 8], 0, 0));
        assert!(state.accept(good, 12, 3));
        assert_eq!(state.last_discrepancy(), 12);
        assert_eq!(state.last_family_discrepancy(), 3);
        assert!(!state.is_last_device());
    }

    #[test]
    fn iterator_api_and_verify() {
        let a = DeviceAddress::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        let b = DeviceAddress::from_parts(0x10, [1, 2, 3, 4, 5, 6]);
        let mut bus = SimBus::with_devices([a, b]);
        let mut search = OneWireSearch::new(&mut bus, OneWireSearchKind::Normal);
        let mut found = Vec::new();
        while let Some(addr) = search.next().unwrap() {
            found.push(addr);
        }
        assert_eq!(found.len(), 2);
        assert!(search.verify(a).unwrap());
        let missing = DeviceAddress::from_parts(0x28, [1, 2, 3, 4, 5, 7]);
        assert!(!search.verify(missing).unwrap());

        let mut search = OneWireSearch::with_family(&mut bus, OneWireSearchKind::Normal, 0x10);
        assert_eq!(search.next().unwrap(), Some(b));
        assert_eq!(search.next().unwrap(), None);
    }

    #[test]
    fn strong_access_against_simulated_bus() {
        let a = DeviceAddress::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        let b = DeviceAddress::from_parts(0x28, [1, 2, 3, 4, 5, 7]);
        let missing = DeviceAddress::from_parts(0x10, [1, 2, 3, 4, 5, 6]);
        let mut bus = SimBus::with_devices([a, b]);
        for (address, present) in [(a, true), (b, true), (missing, false)] {
            bus.reset().unwrap();
            bus.write_byte(ONEWIRE_SEARCH_CMD).unwrap();
            let mut block = strong_access_block(&address);
            block.iter_mut().for_each(|byte| *byte = bus.touch_byte(*byte));
            assert_eq!(strong_access_matches(&address, &block), present);
        }
    }
}
