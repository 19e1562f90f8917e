#![no_std]

pub mod gpio;
pub mod rcc;
pub mod spi_slave;
pub mod tick;
pub mod uart_hw;
pub mod uart_soft;
