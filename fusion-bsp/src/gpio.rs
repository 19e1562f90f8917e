use stm32ral::gpio;
use stm32ral::{modify_reg, read_reg, write_reg};

pub struct GPIO {
    p: gpio::Instance,
}

impl<'a> GPIO {
    pub fn new(p: gpio::Instance) -> Self {
        GPIO { p }
    }

    pub fn pin(&'a self, n: u8) -> Pin<'a> {
        assert!(n < 16);
        let n = unsafe { core::mem::transmute(n) };
        Pin { n, port: self }
    }

    #[inline(always)]
    pub fn set_high(&'a self, n: PinIndex) -> &Self {
        write_reg!(gpio, self.p, BSRR, 1 << (n as u8));
        self
    }

    #[inline(always)]
    pub fn set_low(&'a self, n: PinIndex) -> &Self {
        write_reg!(gpio, self.p, BSRR, 1 << ((n as u8) + 16));
        self
    }

    #[inline]
    pub fn toggle(&'a self, n: PinIndex) -> &Self {
        let pin = (read_reg!(gpio, self.p, IDR) >> (n as u8)) & 1;
        if pin == 1 {
            self.set_low(n)
        } else {
            self.set_high(n)
        }
    }

    #[inline]
    pub fn set_mode(&'a self, n: PinIndex, mode: u32) -> &Self {
        let offset = (n as u8) * 2;
        let mask = 0b11 << offset;
        let val = (mode << offset) & mask;
        modify_reg!(gpio, self.p, MODER, |r| (r & !mask) | val);
        self
    }

    pub const fn memoise_mode(n: PinIndex, mode: u32) -> MemoisedMode {
        let n = (n as u8) & 0xF;
        let offset = n * 2;
        let mask = 0b11 << offset;
        let value = (mode << offset) & mask;
        MemoisedMode { mask: !mask, value }
    }

    #[inline]
    pub fn apply_memoised_mode(&'a self, mode: MemoisedMode) -> &Self {
        modify_reg!(gpio, self.p, MODER, |r| (r & mode.mask) | mode.value);
        self
    }

    #[inline]
    pub fn set_mode_input(&'a self, n: PinIndex) -> &Self {
        self.set_mode(n, gpio::MODER::MODER0::RW::Input)
    }

    pub const fn memoise_mode_input(n: PinIndex) -> MemoisedMode {
        Self::memoise_mode(n, gpio::MODER::MODER0::RW::Input)
    }

    #[inline]
    pub fn set_mode_output(&'a self, n: PinIndex) -> &Self {
        self.set_mode(n, gpio::MODER::MODER0::RW::Output)
    }

    pub const fn memoise_mode_output(n: PinIndex) -> MemoisedMode {
        Self::memoise_mode(n, gpio::MODER::MODER0::RW::Output)
    }

    #[inline]
    pub fn set_mode_alternate(&'a self, n: PinIndex) -> &Self {
        self.set_mode(n, gpio::MODER::MODER0::RW::Alternate)
    }

    pub const fn memoise_mode_alternate(n: PinIndex) -> MemoisedMode {
        Self::memoise_mode(n, gpio::MODER::MODER0::RW::Alternate)
    }

    #[inline]
    pub fn set_mode_analog(&'a self, n: PinIndex) -> &Self {
        self.set_mode(n, gpio::MODER::MODER0::RW::Analog)
    }

    pub const fn memoise_mode_analog(n: PinIndex) -> MemoisedMode {
        Self::memoise_mode(n, gpio::MODER::MODER0::RW::Analog)
    }

    #[inline]
    pub fn set_otype(&'a self, n: PinIndex, otype: u32) -> &Self {
        let offset = n as u8;
        let mask = 0b1 << offset;
        let val = (otype << offset) & mask;
        modify_reg!(gpio, self.p, OTYPER, |r| (r & !mask) | val);
        self
    }

    #[inline]
    pub fn set_otype_opendrain(&'a self, n: PinIndex) -> &Self {
        self.set_otype(n, gpio::OTYPER::OT0::RW::OpenDrain)
    }

    #[inline]
    pub fn set_otype_pushpull(&'a self, n: PinIndex) -> &Self {
        self.set_otype(n, gpio::OTYPER::OT0::RW::PushPull)
    }

    #[inline]
    pub fn set_ospeed(&'a self, n: PinIndex, ospeed: u32) -> &Self {
        let offset = (n as u8) * 2;
        let mask = 0b11 << offset;
        let val = (ospeed << offset) & mask;
        modify_reg!(gpio, self.p, OSPEEDR, |r| (r & !mask) | val);
        self
    }

    #[inline]
    pub fn set_ospeed_low(&'a self, n: PinIndex) -> &Self {
        self.set_ospeed(n, gpio::OSPEEDR::OSPEEDR0::RW::LowSpeed)
    }

    #[inline]
    pub fn set_ospeed_medium(&'a self, n: PinIndex) -> &Self {
        self.set_ospeed(n, gpio::OSPEEDR::OSPEEDR0::RW::MediumSpeed)
    }

    #[inline]
    pub fn set_ospeed_high(&'a self, n: PinIndex) -> &Self {
        self.set_ospeed(n, gpio::OSPEEDR::OSPEEDR0::RW::HighSpeed)
    }

    #[inline]
    pub fn set_ospeed_veryhigh(&'a self, n: PinIndex) -> &Self {
        self.set_ospeed(n, gpio::OSPEEDR::OSPEEDR0::RW::VeryHighSpeed)
    }

    #[inline]
    pub fn set_af(&'a self, n: PinIndex, af: u32) -> &Self {
        let n = n as u8;
        if n < 8 {
            let offset = n * 4;
            let mask = 0b1111 << offset;
            let val = (af << offset) & mask;
            modify_reg!(gpio, self.p, AFRL, |r| (r & !mask) | val);
        } else {
            let offset = (n - 8) * 4;
            let mask = 0b1111 << offset;
            let val = (af << offset) & mask;
            modify_reg!(gpio, self.p, AFRH, |r| (r & !mask) | val);
        }
        self
    }

    #[inline]
    pub fn set_pull(&'a self, n: PinIndex, pull: u32) -> &Self {
        let offset = (n as u8) * 2;
        let mask = 0b11 << offset;
        let val = (pull << offset) & mask;
        modify_reg!(gpio, self.p, PUPDR, |r| (r & !mask) | val);
        self
    }

    #[inline]
    pub fn set_pull_floating(&'a self, n: PinIndex) -> &Self {
        self.set_pull(n, gpio::PUPDR::PUPDR0::RW::Floating)
    }

    #[inline]
    pub fn set_pull_up(&'a self, n: PinIndex) -> &Self {
        self.set_pull(n, gpio::PUPDR::PUPDR0::RW::PullUp)
    }

    #[inline]
    pub fn set_pull_down(&'a self, n: PinIndex) -> &Self {
        self.set_pull(n, gpio::PUPDR::PUPDR0::RW::PullDown)
    }

    #[inline]
    pub fn get_idr(&'a self) -> u32 {
        read_reg!(gpio, self.p, IDR)
    }

    #[inline]
    pub fn get_pin_idr(&'a self, n: PinIndex) -> u32 {
        let n = n as u8;
        (self.get_idr() & (1 << n)) >> n
    }
}

/// Stores a pre-computed mask and value for quickly changing pin mode
#[derive(Copy, Clone)]
pub struct MemoisedMode {
    mask: u32,
    value: u32,
}

#[repr(u16)]
pub enum PinState {
    Low = 0,
    High = 1,
}

#[derive(Copy, Clone)]
#[repr(u8)]
pub enum PinIndex {
    Pin0 = 0,
    Pin1 = 1,
    Pin2 = 2,
    Pin3 = 3,
    Pin4 = 4,
    Pin5 = 5,
    Pin6 = 6,
    Pin7 = 7,
    Pin8 = 8,
    Pin9 = 9,
    Pin10 = 10,
    Pin11 = 11,
    Pin12 = 12,
    Pin13 = 13,
    Pin14 = 14,
    Pin15 = 15,
}

pub struct Pin<'a> {
    n: PinIndex,
    port: &'a GPIO,
}

impl<'a> Pin<'a> {
    #[inline(always)]
    pub fn set_high(&self) -> &Self {
        self.port.set_high(self.n);
        self
    }

    #[inline(always)]
    pub fn set_low(&self) -> &Self {
        self.port.set_low(self.n);
        self
    }

    #[inline(always)]
    pub fn set_bool(&self, state: bool) {
        match state {
            false => self.set_low(),
            true => self.set_high(),
        };
    }

    #[inline(always)]
    pub fn set_state(&self, state: PinState) {
        match state {
            PinState::Low => self.set_low(),
            PinState::High => self.set_high(),
        };
    }

    #[inline(always)]
    pub fn get_state(&self) -> PinState {
        match self.port.get_pin_idr(self.n) {
            0 => PinState::Low,
            1 => PinState::High,
            _ => unreachable!(),
        }
    }

    #[inline(always)]
    pub fn is_high(&self) -> bool {
        match self.get_state() {
            PinState::High => true,
            PinState::Low => false,
        }
    }

    #[inline(always)]
    pub fn is_low(&self) -> bool {
        match self.get_state() {
            PinState::Low => true,
            PinState::High => false,
        }
    }

    #[inline(always)]
    pub fn toggle(&'a self) -> &Self {
        self.port.toggle(self.n);
        self
    }

    #[inline]
    pub fn set_mode_input(&'a self) -> &Self {
        self.port.set_mode_input(self.n);
        self
    }

    #[inline]
    pub fn set_mode_output(&'a self) -> &Self {
        self.port.set_mode_output(self.n);
        self
    }

    #[inline]
    pub fn set_mode_alternate(&'a self) -> &Self {
        self.port.set_mode_alternate(self.n);
        self
    }

    #[inline]
    pub fn set_mode_analog(&'a self) -> &Self {
        self.port.set_mode_analog(self.n);
        self
    }

    pub fn memoise_mode_input(&'a self) -> MemoisedMode {
        GPIO::memoise_mode_input(self.n)
    }

    pub fn memoise_mode_output(&'a self) -> MemoisedMode {
        GPIO::memoise_mode_output(self.n)
    }

    pub fn memoise_mode_alternate(&'a self) -> MemoisedMode {
        GPIO::memoise_mode_alternate(self.n)
    }

    pub fn memoise_mode_analog(&'a self) -> MemoisedMode {
        GPIO::memoise_mode_analog(self.n)
    }

    #[inline]
    pub fn apply_memoised_mode(&'a self, mode: MemoisedMode) -> &Self {
        self.port.apply_memoised_mode(mode);
        self
    }

    #[inline]
    pub fn set_otype_opendrain(&'a self) -> &Self {
        self.port.set_otype_opendrain(self.n);
        self
    }

    #[inline]
    pub fn set_otype_pushpull(&'a self) -> &Self {
        self.port.set_otype_pushpull(self.n);
        self
    }

    #[inline]
    pub fn set_ospeed_low(&'a self) -> &Self {
        self.port.set_ospeed_low(self.n);
        self
    }

    #[inline]
    pub fn set_ospeed_medium(&'a self) -> &Self {
        self.port.set_ospeed_medium(self.n);
        self
    }

    #[inline]
    pub fn set_ospeed_high(&'a self) -> &Self {
        self.port.set_ospeed_high(self.n);
        self
    }

    #[inline]
    pub fn set_ospeed_veryhigh(&'a self) -> &Self {
        self.port.set_ospeed_veryhigh(self.n);
        self
    }

    #[inline]
    pub fn set_af(&'a self, af: u32) -> &Self {
        self.port.set_af(self.n, af);
        self
    }

    #[inline]
    pub fn set_pull_floating(&'a self) -> &Self {
        self.port.set_pull_floating(self.n);
        self
    }

    #[inline]
    pub fn set_pull_up(&'a self) -> &Self {
        self.port.set_pull_up(self.n);
        self
    }

    #[inline]
    pub fn set_pull_down(&'a self) -> &Self {
        self.port.set_pull_down(self.n);
        self
    }
}


/// Board pin map for the fusion node.
///
/// Which physical pin feeds which receiver is board bring-up, out of this
/// crate's core scope (spec §1) — `Pins` just names the eight RX lines, the
/// SPI slave bus, and the host chip-select line so `fusion-firmware::main`
/// has somewhere to wire them from.
pub struct Pins<'a> {
    /// Modules 1-3: hardware UART RX pins (USART1/2/3).
    pub hw_uart_rx: [Pin<'a>; 3],

    /// Modules 4-8: soft-UART RX pins, sampled by the shared timer.
    pub soft_uart_rx: [Pin<'a>; 5],

    /// SPI slave bus to the host.
    pub spi_sck: Pin<'a>,
    pub spi_miso: Pin<'a>,
    pub spi_mosi: Pin<'a>,
    pub spi_cs: Pin<'a>,
}

impl<'a> Pins<'a> {
    /// Configure the hardware UART RX pins for their alternate function and
    /// the soft-UART RX pins as plain digital inputs.
    pub fn setup(&self) {
        for pin in &self.hw_uart_rx {
            pin.set_af(7).set_pull_up().set_mode_alternate();
        }
        for pin in &self.soft_uart_rx {
            pin.set_pull_up().set_mode_input();
        }

        self.spi_sck.set_af(5).set_mode_alternate();
        self.spi_miso
            .set_af(5)
            .set_otype_pushpull()
            .set_ospeed_high()
            .set_mode_alternate();
        self.spi_mosi.set_af(5).set_mode_alternate();
        // CS is driven by the host but never wired to the SPI peripheral's
        // own NSS input: selection is entirely software-managed, tracked by
        // the GPIO EXTI edge on this pin (spec §4.9).
        self.spi_cs.set_pull_up().set_mode_input();
    }
}
