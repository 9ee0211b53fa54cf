//! In-system programming.
//!
//! [`FlashController`] drives a raw flash [`Peripheral`] through an erase or
//! program sequence without ever blocking: each call to [`Isp::poll`] starts
//! at most one hardware unit (one erase page or one write granule) and returns
//! whether work remains. This keeps the worst case latency of a main loop
//! iteration bounded by a single flash operation.
use crate::{
    config::MAX_PAYLOAD_LENGTH,
    devices::protocol::RespStatus,
    error::Error,
    hal::flash::Peripheral,
};
use heapless::Vec;

/// Outcome of the last flash operation. Retained until the next one starts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum OpStatus {
    Ok,
    InvalidArgs,
    FlashError,
}

impl From<OpStatus> for RespStatus {
    fn from(status: OpStatus) -> Self {
        match status {
            OpStatus::Ok => RespStatus::Done,
            OpStatus::InvalidArgs => RespStatus::InvalidArgs,
            OpStatus::FlashError => RespStatus::FlashError,
        }
    }
}

/// Non blocking flash programming interface.
pub trait Isp {
    /// Unlocks the flash for programming.
    fn begin(&mut self) -> bool;
    /// Locks the flash again.
    fn end(&mut self) -> bool;

    /// First flash address and one past the last.
    fn range(&self) -> (u32, u32);
    fn erase_granularity(&self) -> usize;
    fn write_granularity(&self) -> usize;

    /// Starts erasing `[address, address + length)`. Returns false only if an
    /// operation is already in progress. Invalid arguments are accepted
    /// and complete immediately with `InvalidArgs`, without touching hardware.
    fn begin_erase(&mut self, address: u32, length: usize) -> bool;

    /// Starts programming `data` at `address`. `data` is copied, so the caller
    /// is free to reuse it right away. Same admission rules as `begin_erase`.
    fn begin_write(&mut self, address: u32, data: &[u8]) -> bool;

    /// Advances the current operation by at most one unit. Returns true
    /// while work remains.
    fn poll(&mut self) -> bool;

    /// Whether the last operation has finished, and how.
    fn last_status(&self) -> (bool, OpStatus);

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Error>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
enum FlashOp {
    Idle,
    Erasing { address: u32, remaining: usize },
    Writing { address: u32, remaining: usize, cursor: usize },
}

pub struct FlashController<P: Peripheral> {
    peripheral: P,
    operation: FlashOp,
    status: OpStatus,
    data: Vec<u8, MAX_PAYLOAD_LENGTH>,
}

impl<P: Peripheral> FlashController<P> {
    pub fn new(peripheral: P) -> Self {
        Self { peripheral, operation: FlashOp::Idle, status: OpStatus::Ok, data: Vec::new() }
    }

    pub fn peripheral(&self) -> &P { &self.peripheral }
    pub fn peripheral_mut(&mut self) -> &mut P { &mut self.peripheral }

    /// Erases, blocking until done. Finishes any operation in progress first.
    pub fn erase(&mut self, address: u32, length: usize) -> OpStatus {
        while self.poll() {}
        self.begin_erase(address, length);
        while self.poll() {}
        self.status
    }

    /// Programs, blocking until done. Finishes any operation in progress first.
    pub fn write(&mut self, address: u32, data: &[u8]) -> OpStatus {
        while self.poll() {}
        self.begin_write(address, data);
        while self.poll() {}
        self.status
    }

    fn is_valid_range(&self, address: u32, length: usize, granularity: usize) -> bool {
        let (start, end) = self.peripheral.range();
        length > 0
            && length % granularity == 0
            && address % granularity as u32 == 0
            && address >= start
            && address as u64 + length as u64 <= end as u64
    }

    fn finish(&mut self, status: OpStatus) -> bool {
        self.peripheral.end_operation();
        self.operation = FlashOp::Idle;
        self.status = status;
        false
    }
}

impl<P: Peripheral> Isp for FlashController<P> {
    fn begin(&mut self) -> bool { self.peripheral.unlock().is_ok() }
    fn end(&mut self) -> bool { self.peripheral.lock().is_ok() }

    fn range(&self) -> (u32, u32) { self.peripheral.range() }
    fn erase_granularity(&self) -> usize { self.peripheral.erase_granularity() }
    fn write_granularity(&self) -> usize { self.peripheral.write_granularity() }

    fn begin_erase(&mut self, address: u32, length: usize) -> bool {
        if self.operation != FlashOp::Idle {
            return false;
        }
        if !self.is_valid_range(address, length, self.peripheral.erase_granularity()) {
            dwarn!("Rejected erase of {=u32:#x} (+{=usize})", address, length);
            self.status = OpStatus::InvalidArgs;
            return true;
        }
        self.status = OpStatus::Ok;
        self.operation = FlashOp::Erasing { address, remaining: length };
        true
    }

    fn begin_write(&mut self, address: u32, data: &[u8]) -> bool {
        if self.operation != FlashOp::Idle {
            return false;
        }
        let valid = self.is_valid_range(address, data.len(), self.peripheral.write_granularity());
        self.data.clear();
        if !valid || self.data.extend_from_slice(data).is_err() {
            dwarn!("Rejected write of {=usize} bytes at {=u32:#x}", data.len(), address);
            self.status = OpStatus::InvalidArgs;
            return true;
        }
        self.status = OpStatus::Ok;
        self.operation = FlashOp::Writing { address, remaining: data.len(), cursor: 0 };
        true
    }

    fn poll(&mut self) -> bool {
        if self.operation == FlashOp::Idle {
            return false;
        }

        match self.peripheral.status() {
            Err(nb::Error::WouldBlock) => return true,
            Err(nb::Error::Other(_)) => {
                derror!("Flash operation failed: {}", self.operation);
                return self.finish(OpStatus::FlashError);
            }
            Ok(()) => {}
        }

        match self.operation {
            FlashOp::Erasing { address, remaining } if remaining > 0 => {
                let unit = self.peripheral.erase_granularity();
                self.peripheral.start_erase(address);
                self.operation =
                    FlashOp::Erasing { address: address + unit as u32, remaining: remaining - unit };
                true
            }
            FlashOp::Writing { address, remaining, cursor } if remaining > 0 => {
                let unit = self.peripheral.write_granularity();
                self.peripheral.start_program(address, &self.data[cursor..cursor + unit]);
                self.operation = FlashOp::Writing {
                    address: address + unit as u32,
                    remaining: remaining - unit,
                    cursor: cursor + unit,
                };
                true
            }
            _ => self.finish(OpStatus::Ok),
        }
    }

    fn last_status(&self) -> (bool, OpStatus) { (self.operation == FlashOp::Idle, self.status) }

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Error> {
        self.peripheral.read(address, bytes).map_err(Into::into)
    }
}

#[cfg(not(target_arch = "arm"))]
#[doc(hidden)]
pub mod doubles {
    //! Scripted ISP recording every call, for exercising the layers above
    //! the flash controller without a flash array.
    use super::*;
    use std::vec::Vec as StdVec;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum IspCall {
        Begin,
        End,
        BeginErase(u32, usize),
        BeginWrite(u32, StdVec<u8>),
        Poll,
        Read(u32, usize),
    }

    /// Accepts everything, stays busy for `busy_polls` polls per operation
    /// and then completes with `outcome`.
    #[derive(Debug)]
    pub struct MockIsp {
        pub calls: StdVec<IspCall>,
        pub busy_polls: u32,
        pub outcome: OpStatus,
        pub memory: StdVec<(u32, [u8; 8])>,
        remaining: Option<u32>,
        status: OpStatus,
    }

    impl Default for MockIsp {
        fn default() -> Self {
            Self {
                calls: StdVec::new(),
                busy_polls: 2,
                outcome: OpStatus::Ok,
                memory: StdVec::new(),
                remaining: None,
                status: OpStatus::Ok,
            }
        }
    }

    impl MockIsp {
        /// Default behaviour, with readable 8 byte vectors at the given addresses.
        pub fn with_memory(memory: &[(u32, [u8; 8])]) -> Self {
            Self { memory: memory.to_vec(), ..Default::default() }
        }

        /// Calls that start or advance flash work.
        pub fn flash_calls(&self) -> StdVec<IspCall> {
            self.calls
                .iter()
                .filter(|c| matches!(c, IspCall::BeginErase(..) | IspCall::BeginWrite(..) | IspCall::Poll))
                .cloned()
                .collect()
        }

        pub fn erases(&self) -> StdVec<(u32, usize)> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    IspCall::BeginErase(address, length) => Some((*address, *length)),
                    _ => None,
                })
                .collect()
        }

        fn start(&mut self) -> bool {
            if self.remaining.is_some() {
                return false;
            }
            self.remaining = Some(self.busy_polls);
            true
        }
    }

    impl Isp for MockIsp {
        fn begin(&mut self) -> bool {
            self.calls.push(IspCall::Begin);
            true
        }

        fn end(&mut self) -> bool {
            self.calls.push(IspCall::End);
            true
        }

        fn range(&self) -> (u32, u32) { (0x0800_0000, 0x0804_0000) }
        fn erase_granularity(&self) -> usize { 2048 }
        fn write_granularity(&self) -> usize { 8 }

        fn begin_erase(&mut self, address: u32, length: usize) -> bool {
            self.calls.push(IspCall::BeginErase(address, length));
            self.start()
        }

        fn begin_write(&mut self, address: u32, data: &[u8]) -> bool {
            self.calls.push(IspCall::BeginWrite(address, data.to_vec()));
            self.start()
        }

        fn poll(&mut self) -> bool {
            self.calls.push(IspCall::Poll);
            match self.remaining {
                Some(0) => {
                    self.remaining = None;
                    self.status = self.outcome;
                    false
                }
                Some(n) => {
                    self.remaining = Some(n - 1);
                    true
                }
                None => false,
            }
        }

        fn last_status(&self) -> (bool, OpStatus) { (self.remaining.is_none(), self.status) }

        fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Error> {
            self.calls.push(IspCall::Read(address, bytes.len()));
            let (_, vector) = self
                .memory
                .iter()
                .find(|(start, _)| *start == address)
                .ok_or(Error::DriverError("Unmapped address"))?;
            let length = bytes.len().min(vector.len());
            bytes[..length].copy_from_slice(&vector[..length]);
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::doubles::flash::{FakeFlash, FlashEvent};

    fn controller() -> FlashController<FakeFlash> {
        let mut controller = FlashController::new(FakeFlash::stm32l432kc().with_busy_polls(2));
        assert!(controller.begin());
        controller
    }

    fn run_to_completion(controller: &mut FlashController<FakeFlash>) -> usize {
        let mut polls = 1;
        while controller.poll() {
            polls += 1;
            assert!(polls < 10_000, "flash operation never completed");
        }
        polls
    }

    #[test]
    fn invalid_erase_arguments_complete_immediately_without_hardware_access() {
        let cases = [
            (0x0800_0400, 2048),      // misaligned address
            (0x0800_0000, 0),         // empty
            (0x0800_0000, 1000),      // not a multiple of a page
            (0x0803_F800, 4096),      // runs past the end of flash
            (0x0700_0000, 2048),      // before flash
            (0xFFFF_F800, 2048),      // wraps the address space
        ];
        for (address, length) in cases {
            // Given
            let mut controller = controller();

            // When
            let accepted = controller.begin_erase(address, length);

            // Then
            assert!(accepted);
            assert_eq!(controller.last_status(), (true, OpStatus::InvalidArgs));
            assert!(!controller.poll());
            assert!(controller.peripheral().operations().is_empty());
        }
    }

    #[test]
    fn invalid_write_arguments_complete_immediately_without_hardware_access() {
        let too_long = [0u8; MAX_PAYLOAD_LENGTH + 8];
        let cases: [(u32, &[u8]); 4] = [
            (0x0800_0004, &[0u8; 8]),
            (0x0800_0000, &[0u8; 12]),
            (0x0800_0000, &[]),
            (0x0800_0000, &too_long),
        ];
        for (address, data) in cases {
            // Given
            let mut controller = controller();

            // When
            let accepted = controller.begin_write(address, data);

            // Then
            assert!(accepted);
            assert_eq!(controller.last_status(), (true, OpStatus::InvalidArgs));
            assert!(controller.peripheral().operations().is_empty());
        }
    }

    #[test]
    fn erase_advances_one_page_per_poll() {
        // Given
        let mut controller = controller();
        controller.peripheral_mut().preload(0x0801_0000, &[0u8; 4096]);

        // When
        assert!(controller.begin_erase(0x0801_0000, 4096));
        assert!(controller.peripheral().operations().is_empty());
        let polls = run_to_completion(&mut controller);

        // Then (two starts, two busy polls after each, one final poll)
        assert_eq!(polls, 2 + 2 * 2 + 1);
        assert_eq!(
            controller.peripheral().operations(),
            vec![FlashEvent::Erase(0x0801_0000), FlashEvent::Erase(0x0801_0800)]
        );
        assert!(controller.peripheral().bytes(0x0801_0000, 4096).iter().all(|b| *b == 0xFF));
        assert_eq!(controller.last_status(), (true, OpStatus::Ok));
    }

    #[test]
    fn write_programs_one_granule_per_poll() {
        // Given
        let mut controller = controller();
        let data: std::vec::Vec<u8> = (0..24u8).collect();

        // When
        assert!(controller.begin_write(0x0802_0000, &data));
        run_to_completion(&mut controller);

        // Then
        assert_eq!(controller.peripheral().operations().len(), 3);
        assert_eq!(controller.peripheral().bytes(0x0802_0000, 24), &data[..]);
        assert_eq!(controller.last_status(), (true, OpStatus::Ok));
    }

    #[test]
    fn second_operation_is_refused_while_one_is_in_progress() {
        // Given
        let mut controller = controller();
        assert!(controller.begin_erase(0x0801_0000, 2048));

        // When
        let erase = controller.begin_erase(0x0801_0800, 2048);
        let write = controller.begin_write(0x0801_0800, &[0u8; 8]);

        // Then
        assert!(!erase);
        assert!(!write);
        assert_eq!(controller.last_status(), (false, OpStatus::Ok));
    }

    #[test]
    fn hardware_fault_aborts_the_remaining_units() {
        // Given
        let mut controller = controller();
        controller.peripheral_mut().fail_at = Some(0x0801_0800);

        // When
        assert!(controller.begin_erase(0x0801_0000, 3 * 2048));
        run_to_completion(&mut controller);

        // Then
        assert_eq!(controller.last_status(), (true, OpStatus::FlashError));
        assert_eq!(
            controller.peripheral().operations(),
            vec![FlashEvent::Erase(0x0801_0000), FlashEvent::Erase(0x0801_0800)]
        );
    }

    #[test]
    fn programming_over_unerased_flash_is_a_flash_error() {
        // Given
        let mut controller = controller();
        controller.peripheral_mut().preload(0x0801_0000, &[0u8; 8]);

        // When
        let status = controller.write(0x0801_0000, &[0x55; 8]);

        // Then
        assert_eq!(status, OpStatus::FlashError);
    }

    #[test]
    fn locked_flash_refuses_to_program() {
        // Given
        let mut controller = FlashController::new(FakeFlash::stm32l432kc());

        // When
        let status = controller.erase(0x0801_0000, 2048);

        // Then
        assert_eq!(status, OpStatus::FlashError);
    }

    #[test]
    fn status_is_retained_until_the_next_operation() {
        // Given
        let mut controller = controller();
        assert_eq!(controller.erase(0x0801_0000, 1), OpStatus::InvalidArgs);

        // When
        let before = controller.last_status();
        let status = controller.erase(0x0801_0000, 2048);

        // Then
        assert_eq!(before, (true, OpStatus::InvalidArgs));
        assert_eq!(status, OpStatus::Ok);
        assert!(controller.peripheral().events.contains(&FlashEvent::EndOperation));
    }
}
