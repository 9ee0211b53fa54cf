//! Bootloader orchestration on top of the flash controller.
//!
//! The first bytes of the application region double as the reset vector of
//! the part. Erasing them would leave the chip unbootable until the new
//! image is written, so the orchestrator never lets the application vector
//! land there:
//!
//! * Writes covering the boot vector put those bytes in a shadow region
//!   instead, and the rest of the data where it was requested.
//! * Erases covering the boot vector erase the shadow, then erase the vector
//!   sector and immediately program the bootloader's own vector back into it.
//!
//! The application is later launched through the vector found in the shadow.
use crate::{
    config::{self, MAX_PAYLOAD_LENGTH, VECTOR_LENGTH},
    devices::{
        isp::{Isp, OpStatus},
        protocol::RespStatus,
    },
    error::Error,
    hal::boot::Launch,
    utilities::memory::Region,
};
use core::convert::Infallible;
use heapless::Vec;

/// Owned data of a write, held until the write completes.
pub type WriteBuffer = Vec<u8, MAX_PAYLOAD_LENGTH>;

const ERASED_WORD: u32 = 0xFFFF_FFFF;
const MAX_STAGES: usize = 5;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryMap {
    /// Everything the host may erase or write.
    pub application: Region,
    /// Staged copy of the application's boot vector.
    pub shadow: Region,
    /// Bytes fetched by the core on reset.
    pub boot_vector: Region,
    /// Image of this bootloader, whose vector guards the boot vector sector.
    pub bootloader: Region,
}

impl MemoryMap {
    /// Layout selected at build time.
    pub const fn configured() -> Self {
        Self {
            application: config::APPLICATION,
            shadow: config::BOOTLOADER_DATA,
            boot_vector: config::BOOT_VECTOR,
            bootloader: config::BOOTLOADER,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Source {
    Data { start: usize, end: usize },
    Template,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    Erase { address: u32, length: usize },
    Write { address: u32, source: Source },
}

type Plan = Vec<Stage, MAX_STAGES>;

struct Job {
    stages: Plan,
    next: usize,
    data: WriteBuffer,
    in_flight: bool,
}

pub struct Bootloader<I: Isp, L: Launch> {
    isp: I,
    launcher: L,
    map: MemoryMap,
    vector_template: [u8; VECTOR_LENGTH],
    job: Option<Job>,
    last_response: RespStatus,
}

impl<I: Isp, L: Launch> Bootloader<I, L> {
    /// Fetches this bootloader's own vector, which is programmed into the boot
    /// vector sector whenever the application's vector is erased.
    pub fn new(mut isp: I, launcher: L, map: MemoryMap) -> Result<Self, Error> {
        let mut vector_template = [0u8; VECTOR_LENGTH];
        isp.read(map.bootloader.start, &mut vector_template)?;
        if vector_template.iter().all(|b| *b == 0xFF) {
            return Err(Error::ConfigurationError("Bootloader vector is blank"));
        }
        Ok(Self { isp, launcher, map, vector_template, job: None, last_response: RespStatus::Done })
    }

    pub fn isp(&self) -> &I { &self.isp }
    pub fn is_busy(&self) -> bool { self.job.is_some() }

    /// Starts an erase. Returns false if another operation is in flight.
    /// Requests that can't be carried out are accepted and finish right away
    /// with `InvalidArgs`, without touching flash.
    pub fn begin_erase(&mut self, address: u32, length: usize) -> bool {
        if self.is_busy() {
            return false;
        }
        match self.plan_erase(address, length) {
            Ok(stages) => self.start(stages, Vec::new()),
            Err(status) => self.last_response = status,
        }
        true
    }

    /// Starts a write of `data` at `address`. Same admission rules as
    /// [`Bootloader::begin_erase`].
    pub fn begin_write(&mut self, address: u32, data: WriteBuffer) -> bool {
        if self.is_busy() {
            return false;
        }
        match self.plan_write(address, data.len()) {
            Ok(stages) => self.start(stages, data),
            Err(status) => self.last_response = status,
        }
        true
    }

    /// Advances the operation in flight by at most one flash step.
    ///
    /// `Busy` until the last step, which returns (and retains) the outcome.
    pub fn update(&mut self) -> RespStatus {
        let job = match &mut self.job {
            Some(job) => job,
            None => return self.last_response,
        };

        if job.in_flight {
            if self.isp.poll() {
                return RespStatus::Busy;
            }
            job.in_flight = false;
            let (_, status) = self.isp.last_status();
            if status != OpStatus::Ok || job.next == job.stages.len() {
                return self.finish(status.into());
            }
            return RespStatus::Busy;
        }

        let accepted = match job.stages[job.next] {
            Stage::Erase { address, length } => self.isp.begin_erase(address, length),
            Stage::Write { address, source: Source::Data { start, end } } => {
                self.isp.begin_write(address, &job.data[start..end])
            }
            Stage::Write { address, source: Source::Template } => {
                self.isp.begin_write(address, &self.vector_template)
            }
        };
        if !accepted {
            derror!("Flash controller refused stage {=usize}", job.next);
            return self.finish(RespStatus::UnknownError);
        }
        job.next += 1;
        job.in_flight = true;
        RespStatus::Busy
    }

    /// Erases, blocking until done.
    pub fn erase(&mut self, address: u32, length: usize) -> RespStatus {
        if !self.begin_erase(address, length) {
            return RespStatus::UnknownError;
        }
        self.run_to_completion()
    }

    /// Writes, blocking until done.
    pub fn write(&mut self, address: u32, data: WriteBuffer) -> RespStatus {
        if !self.begin_write(address, data) {
            return RespStatus::UnknownError;
        }
        self.run_to_completion()
    }

    /// Jumps into the image whose vector table sits at `address`.
    ///
    /// Only returns on failure, before anything has been torn down.
    pub fn run_app(&mut self, address: u32) -> Result<Infallible, Error> {
        if !self.map.application.contains(address) {
            return Err(Error::AddressOutOfRange);
        }
        if self.is_busy() {
            return Err(Error::OperationInProgress);
        }

        let source = if address == self.map.boot_vector.start { self.map.shadow.start } else { address };
        let mut vector = [0u8; VECTOR_LENGTH];
        self.isp.read(source, &mut vector)?;
        let stack_pointer = u32::from_le_bytes([vector[0], vector[1], vector[2], vector[3]]);
        let entry = u32::from_le_bytes([vector[4], vector[5], vector[6], vector[7]]);
        if stack_pointer == ERASED_WORD || entry == ERASED_WORD {
            return Err(Error::ImageEmpty);
        }

        dinfo!("Launching image at {=u32:#x} (entry {=u32:#x})", address, entry);
        self.launcher.launch(stack_pointer, entry, address)
    }

    fn run_to_completion(&mut self) -> RespStatus {
        loop {
            match self.update() {
                RespStatus::Busy => continue,
                status => return status,
            }
        }
    }

    fn start(&mut self, stages: Plan, data: WriteBuffer) {
        if !self.isp.begin() {
            derror!("Failed to unlock flash");
            self.last_response = RespStatus::FlashError;
            return;
        }
        self.job = Some(Job { stages, next: 0, data, in_flight: false });
    }

    fn finish(&mut self, status: RespStatus) -> RespStatus {
        if !self.isp.end() {
            dwarn!("Failed to lock flash");
        }
        self.job = None;
        self.last_response = status;
        status
    }

    fn admissible(&self, address: u32, length: usize, granularity: usize) -> bool {
        let aligned = length > 0 && length % granularity == 0 && address % granularity as u32 == 0;
        match u32::try_from(length) {
            Ok(length) => aligned && self.map.application.contains_range(address, length),
            Err(_) => false,
        }
    }

    fn plan_erase(&self, address: u32, length: usize) -> Result<Plan, RespStatus> {
        let granularity = self.isp.erase_granularity();
        if !self.admissible(address, length, granularity) {
            return Err(RespStatus::InvalidArgs);
        }

        let mut plan = Plan::new();
        let boot_vector = self.map.boot_vector;
        if !boot_vector.overlaps_range(address, length as u32) {
            push(&mut plan, Stage::Erase { address, length })?;
            return Ok(plan);
        }

        let sector = boot_vector.start - boot_vector.start % granularity as u32;
        let sector_end = sector as u64 + granularity as u64;
        let end = address as u64 + length as u64;
        if address > sector || end < sector_end {
            return Err(RespStatus::InvalidArgs);
        }

        let shadow = self.map.shadow;
        push(&mut plan, Stage::Erase { address: shadow.start, length: shadow.length as usize })?;
        if address < sector {
            push(&mut plan, Stage::Erase { address, length: (sector - address) as usize })?;
        }
        push(&mut plan, Stage::Erase { address: sector, length: granularity })?;
        push(&mut plan, Stage::Write { address: boot_vector.start, source: Source::Template })?;
        if end > sector_end {
            push(&mut plan, Stage::Erase { address: sector_end as u32, length: (end - sector_end) as usize })?;
        }
        Ok(plan)
    }

    fn plan_write(&self, address: u32, length: usize) -> Result<Plan, RespStatus> {
        let granularity = self.isp.write_granularity();
        if !self.admissible(address, length, granularity) {
            return Err(RespStatus::InvalidArgs);
        }

        let mut plan = Plan::new();
        let boot_vector = self.map.boot_vector;
        if !boot_vector.overlaps_range(address, length as u32) {
            push(&mut plan, Stage::Write { address, source: Source::Data { start: 0, end: length } })?;
            return Ok(plan);
        }

        let end = address as u64 + length as u64;
        if address > boot_vector.start || end < boot_vector.end() {
            return Err(RespStatus::InvalidArgs);
        }
        let offset = (boot_vector.start - address) as usize;
        let vector_end = offset + boot_vector.length as usize;
        if offset % granularity != 0 {
            return Err(RespStatus::InvalidArgs);
        }

        if offset > 0 {
            push(&mut plan, Stage::Write { address, source: Source::Data { start: 0, end: offset } })?;
        }
        let staged = Source::Data { start: offset, end: vector_end };
        push(&mut plan, Stage::Write { address: self.map.shadow.start, source: staged })?;
        if vector_end < length {
            let rest = Source::Data { start: vector_end, end: length };
            push(&mut plan, Stage::Write { address: boot_vector.end() as u32, source: rest })?;
        }
        Ok(plan)
    }
}

fn push(plan: &mut Plan, stage: Stage) -> Result<(), RespStatus> {
    plan.push(stage).map_err(|_| RespStatus::UnknownError)
}
