//! NUCLEO-L432KC port: board wiring, role selection and the two cooperative
//! main loops.
//!
//! | Signal        | Pin        |
//! |---------------|------------|
//! | Console TX/RX | PA2 / PA15 |
//! | Chain SCL/SDA | PB6 / PB7  |
//! | Boot in       | PB0        |
//! | Boot out      | PB1        |
//! | Run-app strap | PA12       |
//! | Activity LED  | PB3        |
use crate::{
    config::{
        APPLICATION, BAUD_RATE, BOOTLOADER, BOOTSCAN_DELAY_MS, BOOT_TO_ADDRESS_DELAY_MS,
        MAX_PAYLOAD_LENGTH, PORT,
    },
    devices::{
        activity::ActivityLed,
        bootloader::{Bootloader, MemoryMap},
        chain::{master::Master, slave::Slave},
        isp::FlashController,
        led::{Logic, MonochromeLed},
    },
    drivers::{
        cortex::{self, CycleClock, Launcher},
        stm32l4::{
            flash::McuFlash,
            gpio::{self, Input, Output, Pin},
            i2c::I2c,
            rcc::Clocks,
            serial::Serial,
        },
        tick::Tick,
    },
    error::ReportOnUnwrap,
    hal::{
        gpio::{InputPin, OutputPin},
        serial::Console,
        time::{self, Milliseconds, Now, U32Ext},
    },
    stm32pac,
    utilities::cobs::Decoder,
};
use ufmt::uwriteln;

const ACTIVITY_PULSE: Milliseconds = Milliseconds(25);
const HEARTBEAT_PERIOD: Milliseconds = Milliseconds(1000);
const WAITING_HEARTBEAT_PERIOD: Milliseconds = Milliseconds(500);

type Chainloader = Bootloader<FlashController<McuFlash>, Launcher>;
type Activity = ActivityLed<MonochromeLed<Pin<'B', 3, Output>>, Tick>;
type BootIn = Pin<'B', 0, Input>;
type BootOut = Pin<'B', 1, Output>;

struct Board {
    clock: CycleClock,
    serial: Serial,
    bus: I2c,
    activity: Activity,
    boot_in: BootIn,
    boot_out: BootOut,
    run_app_strap: Pin<'A', 12, Input>,
    bootloader: Chainloader,
}

/// Periodic LED pulse.
struct Heartbeat {
    period: Milliseconds,
    last: Tick,
}

impl Heartbeat {
    fn new(clock: &CycleClock, period: Milliseconds) -> Self { Self { period, last: clock.now() } }

    fn beat(&mut self, clock: &CycleClock, activity: &mut Activity) {
        let now = clock.now();
        if now - self.last >= self.period {
            self.last = now;
            activity.pulse(ACTIVITY_PULSE);
        }
        activity.update(now);
    }
}

/// Brings the board up and never returns: the node ends up either serving
/// the chain or running an application.
pub fn run() -> ! {
    let peripherals = stm32pac::Peripherals::take().unwrap();
    let mut core = cortex_m::Peripherals::take().unwrap();
    cortex::relocate_vector_table(&mut core.SCB, BOOTLOADER.start);

    let clocks = Clocks::hardcoded(peripherals.RCC);
    let clock = CycleClock::new(core.DCB, core.DWT, clocks.sysclk());
    let pins = gpio::split(peripherals.GPIOA, peripherals.GPIOB);

    let mut boot_out = pins.pb1.into_push_pull_output();
    boot_out.set_low();
    let boot_in = pins.pb0.into_pull_up_input();
    let run_app_strap = pins.pa12.into_pull_up_input();

    let mut serial = Serial::new(
        peripherals.USART2,
        (pins.pa2.into_alternate(), pins.pa15.into_alternate()),
        BAUD_RATE.bps(),
        &clocks,
    );
    let bus = I2c::new(
        peripherals.I2C1,
        (pins.pb6.into_alternate_open_drain(), pins.pb7.into_alternate_open_drain()),
    );
    let activity = ActivityLed::new(MonochromeLed::new(pins.pb3.into_push_pull_output(), Logic::Direct), false);

    let isp = FlashController::new(McuFlash::new(peripherals.FLASH));
    let bootloader = Bootloader::new(isp, Launcher, MemoryMap::configured()).report_unwrap(&mut serial);

    time::wait(&clock, BOOTSCAN_DELAY_MS.ms());

    let board = Board { clock, serial, bus, activity, boot_in, boot_out, run_app_strap, bootloader };
    if board.boot_in.is_high() {
        master(board)
    } else {
        slave(board)
    }
}

fn master(board: Board) -> ! {
    let Board { clock, mut serial, bus, mut activity, boot_in, mut boot_out, run_app_strap, mut bootloader } =
        board;
    time::wait(&clock, Milliseconds(5 * BOOTSCAN_DELAY_MS));
    dinfo!("Starting as chain master");
    let _ = uwriteln!(Console(&mut serial), "\r\n\r\nChainloader {}, master\r", PORT);

    let mut master = Master::new(bus);
    boot_out.set_high();
    time::wait(&clock, BOOT_TO_ADDRESS_DELAY_MS.ms());
    master.discover(&clock, BOOT_TO_ADDRESS_DELAY_MS.ms());
    master.report_chain(&mut serial);

    if run_app_strap.is_low() {
        dinfo!("Run-app strap asserted, launching the chain");
        master.autorun(APPLICATION.start);
        match bootloader.run_app(APPLICATION.start) {
            Ok(never) => match never {},
            Err(error) => error.report(&mut serial),
        }
    }

    let mut decoder = Decoder::<MAX_PAYLOAD_LENGTH>::with_buffer();
    let mut heartbeat = Heartbeat::new(&clock, HEARTBEAT_PERIOD);
    loop {
        if boot_in.is_low() {
            cortex::reset();
        }
        if master.serve(&mut serial, &mut decoder, &mut bootloader) {
            activity.pulse(ACTIVITY_PULSE);
        }
        heartbeat.beat(&clock, &mut activity);
    }
}

fn slave(board: Board) -> ! {
    let Board { clock, mut serial, bus, mut activity, boot_in, boot_out, mut bootloader, .. } = board;
    dinfo!("Starting as chain slave");
    let _ = uwriteln!(Console(&mut serial), "\r\n\r\nChainloader {}, slave\r", PORT);

    let mut heartbeat = Heartbeat::new(&clock, WAITING_HEARTBEAT_PERIOD);
    while boot_in.is_low() {
        heartbeat.beat(&clock, &mut activity);
    }

    activity.set_idle_polarity(true);
    let mut slave = Slave::new(bus, boot_out);
    while !slave.await_address() {
        if boot_in.is_low() {
            cortex::reset();
        }
        heartbeat.beat(&clock, &mut activity);
    }

    let mut heartbeat = Heartbeat::new(&clock, HEARTBEAT_PERIOD);
    loop {
        if boot_in.is_low() {
            cortex::reset();
        }
        if slave.service(&mut bootloader) || bootloader.is_busy() {
            activity.pulse(ACTIVITY_PULSE);
        }
        heartbeat.beat(&clock, &mut activity);
    }
}
