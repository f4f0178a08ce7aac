use crate::{Ds2480, Ds2480Error, SerialTransport, registers::ResetResponse};
use embedded_hal::delay::DelayNs;
use onewire_bus::{BusSpeed, OneWire, OneWireResult, consts::ONEWIRE_SKIP_ROM_CMD_OD};

impl<S: SerialTransport, D: DelayNs> OneWire for Ds2480<S, D> {
    type Status = ResetResponse;

    type BusError = Ds2480Error<S::Error>;

    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        Ok(self.bus_reset()?)
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        Ok(self.put_byte(byte)?)
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        Ok(self.get_byte()?)
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        Ok(self.put_bit(bit)?)
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        Ok(self.get_bit()?)
    }

    fn get_overdrive_mode(&mut self) -> OneWireResult<bool, Self::BusError> {
        Ok(self.speed() == BusSpeed::Overdrive)
    }

    fn set_overdrive_mode(&mut self, enable: bool) -> OneWireResult<(), Self::BusError> {
        if enable == (self.speed() == BusSpeed::Overdrive) {
            return Ok(());
        }
        if enable {
            // devices switch on the overdrive skip ROM, the adapter follows
            self.reset()?;
            self.write_byte(ONEWIRE_SKIP_ROM_CMD_OD)?;
            self.set_speed(BusSpeed::Overdrive)?;
        } else {
            // a regular speed reset takes every device out of overdrive
            self.set_speed(BusSpeed::Regular)?;
            self.reset()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Ds2480, sim::SimDs2480};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use onewire_bus::{
        DeviceAddress, OneWire, OneWireError, OneWireSearch, OneWireSearchKind, OneWireStatus,
        ResetResult,
    };

    fn adapter(addresses: &[DeviceAddress]) -> Ds2480<SimDs2480, NoopDelay> {
        let sim = SimDs2480::with_devices(addresses.iter().copied());
        let mut dev = Ds2480::new(sim, NoopDelay::new());
        dev.open("sim0").unwrap();
        dev
    }

    #[test]
    fn bitwise_search_through_trait() {
        let addresses = [
            DeviceAddress::from_parts(0x28, [0x01, 0, 0, 0, 0, 0x10]),
            DeviceAddress::from_parts(0x28, [0x02, 0, 0, 0, 0, 0x10]),
            DeviceAddress::from_parts(0x22, [0x01, 0, 0, 0, 0, 0x10]),
        ];
        let mut dev = adapter(&addresses);
        let mut found = Vec::new();
        let mut search = OneWireSearch::new(&mut dev, OneWireSearchKind::Normal);
        while let Some(address) = search.next().unwrap() {
            found.push(address);
        }
        found.sort();
        let mut expected = addresses.to_vec();
        expected.sort();
        assert_eq!(found, expected);

        let mut search = OneWireSearch::with_family(&mut dev, OneWireSearchKind::Normal, 0x22);
        assert_eq!(search.next().unwrap(), Some(addresses[2]));
        assert!(search.verify(addresses[0]).unwrap());
        assert!(!search
            .verify(DeviceAddress::from_parts(0x28, [0x03, 0, 0, 0, 0, 0x10]))
            .unwrap());
    }

    #[test]
    fn match_rom_selects_one_device() {
        let addresses = [
            DeviceAddress::from_parts(0x10, [1, 2, 3, 4, 5, 6]),
            DeviceAddress::from_parts(0x10, [6, 5, 4, 3, 2, 1]),
        ];
        let mut dev = adapter(&addresses);
        assert_eq!(dev.reset().unwrap().result(), ResetResult::Presence);
        dev.address(Some(addresses[1])).unwrap();
        assert_eq!(dev.read_byte().unwrap(), 0xff);
        assert!(dev.read_bit().unwrap());
    }

    #[test]
    fn empty_bus_has_nobody_to_address() {
        let mut dev = adapter(&[]);
        assert!(!dev.reset().unwrap().presence());
        assert!(matches!(dev.address(None), Err(OneWireError::NoDevicePresent)));
    }

    #[test]
    fn overdrive_toggle() {
        let mut dev = adapter(&[DeviceAddress::from_parts(0x3a, [9, 9, 9, 9, 9, 9])]);
        assert!(!dev.get_overdrive_mode().unwrap());
        dev.set_overdrive_mode(true).unwrap();
        assert!(dev.get_overdrive_mode().unwrap());
        assert!(dev.port().written().contains(&0x3c));
        // overdrive reset command
        dev.reset().unwrap();
        assert_eq!(dev.port().written().last(), Some(&0xc9));
        dev.set_overdrive_mode(false).unwrap();
        assert!(!dev.get_overdrive_mode().unwrap());
    }
}
