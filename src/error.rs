//! Error type for the chainloader project as a whole.
use crate::{devices::protocol::RespStatus, hal::serial::Write};
use ufmt::uwriteln;

/// Top level error type for the bootloader. Unlike the specific
/// module errors, this error contains textual descriptions of the
/// problem as it is meant to be directly reported through USART.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Error {
    /// Error caused by a low level peripheral driver
    DriverError(&'static str),
    /// Error caused by a faulty configuration
    ConfigurationError(&'static str),
    /// Error caused by a high level device driver
    DeviceError(&'static str),
    /// Requested address lies outside of the application region
    AddressOutOfRange,
    /// The vector at the requested address is erased
    ImageEmpty,
    /// A flash operation is still in flight
    OperationInProgress,
    /// The addressed chain node didn't acknowledge
    BusNack,
    /// A relayed command never left the busy state
    ChainUnresponsive,
    /// No chain node at the requested position
    UnknownDevice,
    /// Write data larger than a single frame can carry
    PayloadTooLong,
}

/// Exposes a report_unwrap() method that behaves like
/// unwrap(), but also reports any errors via serial before panicking.
pub trait ReportOnUnwrap<T, S: Write<u8>> {
    fn report_unwrap(self, serial: &mut S) -> T;
}

impl<T, S: Write<u8>> ReportOnUnwrap<T, S> for Result<T, Error> {
    fn report_unwrap(self, serial: &mut S) -> T {
        match self {
            Ok(value) => value,
            Err(error) => {
                error.report(serial);
                panic!();
            }
        }
    }
}

impl Error {
    /// Reports error via abstract serial device
    pub fn report<S: Write<u8>>(&self, serial: &mut S) {
        let mut console = crate::hal::serial::Console(serial);
        let _ = match self {
            Error::DriverError(text) => uwriteln!(console, "[DriverError] -> {}", *text),
            Error::ConfigurationError(text) => {
                uwriteln!(console, "[ConfigurationError] -> {}", *text)
            }
            Error::DeviceError(text) => uwriteln!(console, "[DeviceError] -> {}", *text),
            Error::AddressOutOfRange => {
                uwriteln!(console, "[LogicError] -> Address outside of the application region")
            }
            Error::ImageEmpty => uwriteln!(console, "[LogicError] -> No image at address"),
            Error::OperationInProgress => {
                uwriteln!(console, "[LogicError] -> Flash operation in progress")
            }
            Error::BusNack => uwriteln!(console, "[DriverError] -> Chain bus not acknowledged"),
            Error::ChainUnresponsive => {
                uwriteln!(console, "[DeviceError] -> Chain node stopped responding")
            }
            Error::UnknownDevice => uwriteln!(console, "[LogicError] -> No such device in chain"),
            Error::PayloadTooLong => uwriteln!(console, "[LogicError] -> Payload too long"),
        };
    }
}

impl From<Error> for RespStatus {
    fn from(error: Error) -> Self {
        match error {
            Error::AddressOutOfRange | Error::ImageEmpty | Error::UnknownDevice => {
                RespStatus::InvalidArgs
            }
            Error::PayloadTooLong => RespStatus::InvalidFormat,
            Error::DriverError(_) => RespStatus::FlashError,
            _ => RespStatus::UnknownError,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::doubles::serial::MockSerial;

    #[test]
    fn errors_are_reported_as_single_lines() {
        // Given
        let mut serial = MockSerial::default();

        // When
        Error::DeviceError("Flash unreadable").report(&mut serial);

        // Then
        assert_eq!(serial.written_text(), "[DeviceError] -> Flash unreadable\n");
    }

    #[test]
    fn argument_errors_map_to_invalid_args_on_the_wire() {
        assert_eq!(RespStatus::from(Error::AddressOutOfRange), RespStatus::InvalidArgs);
        assert_eq!(RespStatus::from(Error::ImageEmpty), RespStatus::InvalidArgs);
        assert_eq!(RespStatus::from(Error::UnknownDevice), RespStatus::InvalidArgs);
        assert_eq!(RespStatus::from(Error::BusNack), RespStatus::UnknownError);
        assert_eq!(RespStatus::from(Error::ChainUnresponsive), RespStatus::UnknownError);
    }

    #[test]
    #[should_panic]
    fn report_unwrap_panics_after_reporting() {
        let mut serial = MockSerial::default();
        let result: Result<(), Error> = Err(Error::BusNack);
        result.report_unwrap(&mut serial);
    }
}
