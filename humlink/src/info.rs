//! Controller identity summary

use std::fmt;

use humlink_core::response::{FirmwareVersion, SerialNumber};

/// Controller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    /// Serial number, also the controller id bound into license tokens
    pub serial_number: String,

    /// Main MCU firmware
    pub stm32_firmware: String,

    /// Wi-Fi module firmware
    pub esp32_firmware: String,
}

impl ControllerInfo {
    pub fn new(serial: SerialNumber, firmware: FirmwareVersion) -> Self {
        Self {
            serial_number: serial.serial_id,
            stm32_firmware: firmware.stm32,
            esp32_firmware: firmware.esp32,
        }
    }
}

impl fmt::Display for ControllerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Controller[SN: {}, STM32: {}, ESP32: {}]",
            self.serial_number, self.stm32_firmware, self.esp32_firmware
        )
    }
}
