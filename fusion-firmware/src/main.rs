// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

#![no_std]
#![no_main]

mod app;
mod serial;

use cortex_m_rt::{entry, exception};
use panic_rtt_target as _;
use rtt_target::{rprintln, rtt_init_print};
use stm32ral::{interrupt, Interrupt};

use fusion_bsp::gpio::{Pins, GPIO};
use fusion_bsp::rcc::{CoreFrequency, RCC};
use fusion_bsp::spi_slave::SpiSlave;
use fusion_bsp::tick::Tick;
use fusion_bsp::uart_hw::HwUart;
use fusion_bsp::uart_soft::SoftUartSampler;
use fusion_core::config::{DEFAULT_BAUD, RING_CAPACITY};

use crate::app::App;
use crate::serial::Serial;

// Each peripheral driver is its own producer/consumer pair guarded by the
// same tolerated-race argument as `fusion_core::ring::RingBuffer`: the ISR
// below is the only writer, `main`'s task loop the only reader (or, for the
// soft-UART sampler, the only place that ever calls `isr`), so a `static
// mut` promoted once at start-up and never reassigned is sound in practice
// even though the type system can't see the temporal exclusivity.
static mut UART1: Option<HwUart<RING_CAPACITY>> = None;
static mut UART2: Option<HwUart<RING_CAPACITY>> = None;
static mut UART3: Option<HwUart<RING_CAPACITY>> = None;
static mut SAMPLER: Option<SoftUartSampler<'static, RING_CAPACITY>> = None;
static mut SPI: Option<SpiSlave> = None;
static mut TICK: Option<Tick> = None;
static mut EXTI: Option<stm32ral::exti::Instance> = None;
static mut SPI_CS: Option<fusion_bsp::gpio::Pin<'static>> = None;

// The GPIO ports are promoted to 'static the same way, purely so that the
// `Pin<'static>` handles handed to the soft-UART sampler (itself stored in
// a 'static slot above) borrow something that outlives it.
static mut GPIOA: Option<GPIO> = None;
static mut GPIOB: Option<GPIO> = None;
static mut GPIOD: Option<GPIO> = None;

#[entry]
fn main() -> ! {
    rtt_init_print!();
    rprintln!("fusion node starting");

    let rcc = RCC::new(stm32ral::rcc::RCC::take().unwrap());
    #[cfg(not(feature = "turbo"))]
    let clocks = unsafe { rcc.setup(CoreFrequency::F72MHz) };
    #[cfg(feature = "turbo")]
    let clocks = unsafe { rcc.setup(CoreFrequency::F216MHz) };

    // Promoted to 'static immediately: the soft-UART sampler stored in
    // `SAMPLER` below borrows these ports for the lifetime of the program.
    let (gpioa, gpiob, gpiod): (&'static GPIO, &'static GPIO, &'static GPIO) = unsafe {
        GPIOA = Some(GPIO::new(stm32ral::gpio::GPIOA::take().unwrap()));
        GPIOB = Some(GPIO::new(stm32ral::gpio::GPIOB::take().unwrap()));
        GPIOD = Some(GPIO::new(stm32ral::gpio::GPIOD::take().unwrap()));
        (GPIOA.as_ref().unwrap(), GPIOB.as_ref().unwrap(), GPIOD.as_ref().unwrap())
    };

    let pins = Pins {
        hw_uart_rx: [gpioa.pin(10), gpiod.pin(6), gpiod.pin(9)],
        soft_uart_rx: [gpiob.pin(0), gpiob.pin(1), gpiob.pin(2), gpiob.pin(3), gpiob.pin(4)],
        spi_sck: gpioa.pin(5),
        spi_miso: gpioa.pin(6),
        spi_mosi: gpioa.pin(7),
        spi_cs: gpioa.pin(4),
    };
    pins.setup();

    let mut uart1 = HwUart::<RING_CAPACITY>::new(stm32ral::usart::USART1::take().unwrap());
    let mut uart2 = HwUart::<RING_CAPACITY>::new(stm32ral::usart::USART2::take().unwrap());
    let mut uart3 = HwUart::<RING_CAPACITY>::new(stm32ral::usart::USART3::take().unwrap());
    uart1.setup(&clocks, true);
    uart2.setup(&clocks, false);
    uart3.setup(&clocks, false);
    uart1.start(DEFAULT_BAUD);
    uart2.start(DEFAULT_BAUD);
    uart3.start(DEFAULT_BAUD);

    let soft_pins = [gpiob.pin(0), gpiob.pin(1), gpiob.pin(2), gpiob.pin(3), gpiob.pin(4)];
    let tim6 = stm32ral::tim6::TIM6::take().unwrap();
    let mut sampler = SoftUartSampler::<'static, RING_CAPACITY>::new(tim6, soft_pins);
    sampler.start(&clocks, DEFAULT_BAUD);

    let spi1 = stm32ral::spi::SPI1::take().unwrap();
    let spi = SpiSlave::new(spi1);
    spi.setup();

    let tick = Tick::new(stm32ral::syst::SYST::take().unwrap());
    tick.start(&clocks);

    // Route PA4 (host CS) onto EXTI4 and trigger on both edges. CS is
    // software-managed (spec §4.9): the pin feeds only this EXTI line, never
    // the SPI peripheral's own NSS input, so `SpiSlave::on_select` /
    // `on_deselect` are the only things that ever start or stop the shift.
    let syscfg = stm32ral::syscfg::SYSCFG::take().unwrap();
    stm32ral::modify_reg!(stm32ral::syscfg, syscfg, EXTICR2, EXTI4: PA);
    let exti = stm32ral::exti::EXTI::take().unwrap();
    stm32ral::modify_reg!(stm32ral::exti, exti, IMR, MR4: Unmasked);
    stm32ral::modify_reg!(stm32ral::exti, exti, RTSR, TR4: Enabled);
    stm32ral::modify_reg!(stm32ral::exti, exti, FTSR, TR4: Enabled);

    // Promote everything to 'static storage before unmasking interrupts, so
    // the ISRs never observe `None`.
    let (uart1, uart2, uart3, sampler, spi, _tick, _exti) = unsafe {
        UART1 = Some(uart1);
        UART2 = Some(uart2);
        UART3 = Some(uart3);
        SAMPLER = Some(sampler);
        SPI = Some(spi);
        TICK = Some(tick);
        EXTI = Some(exti);
        SPI_CS = Some(pins.spi_cs);
        (
            UART1.as_ref().unwrap(),
            UART2.as_ref().unwrap(),
            UART3.as_ref().unwrap(),
            SAMPLER.as_ref().unwrap(),
            SPI.as_ref().unwrap(),
            TICK.as_ref().unwrap(),
            EXTI.as_ref().unwrap(),
        )
    };

    unsafe {
        cortex_m::peripheral::NVIC::unmask(Interrupt::USART1);
        cortex_m::peripheral::NVIC::unmask(Interrupt::USART2);
        cortex_m::peripheral::NVIC::unmask(Interrupt::USART3);
        cortex_m::peripheral::NVIC::unmask(Interrupt::TIM6_DAC);
        cortex_m::peripheral::NVIC::unmask(Interrupt::SPI1);
        cortex_m::peripheral::NVIC::unmask(Interrupt::EXTI4);
    }

    let serial = Serial::new([uart1, uart2, uart3], sampler, spi);
    let mut app = App::new(serial);

    rprintln!("fusion node running");
    loop {
        app.poll();
    }
}

#[interrupt]
fn USART1() {
    if let Some(u) = unsafe { UART1.as_ref() } {
        u.isr();
    }
}

#[interrupt]
fn USART2() {
    if let Some(u) = unsafe { UART2.as_ref() } {
        u.isr();
    }
}

#[interrupt]
fn USART3() {
    if let Some(u) = unsafe { UART3.as_ref() } {
        u.isr();
    }
}

#[interrupt]
fn TIM6_DAC() {
    if let Some(s) = unsafe { SAMPLER.as_mut() } {
        s.isr();
    }
}

#[interrupt]
fn SPI1() {
    if let Some(s) = unsafe { SPI.as_ref() } {
        s.isr();
    }
}

/// Host CS line, falling or rising edge (spec §4.9). The pin level read
/// here after the edge tells us which one fired: low means the host just
/// selected us, high means it just deselected.
#[interrupt]
fn EXTI4() {
    if let (Some(s), Some(cs)) = (unsafe { SPI.as_ref() }, unsafe { SPI_CS.as_ref() }) {
        if cs.is_low() {
            s.on_select();
        } else {
            s.on_deselect();
        }
    }
    if let Some(exti) = unsafe { EXTI.as_ref() } {
        stm32ral::write_reg!(stm32ral::exti, exti, PR, PR4: Clear);
    }
}

#[exception]
fn SysTick() {
    if let Some(t) = unsafe { TICK.as_ref() } {
        t.isr();
    }
}
