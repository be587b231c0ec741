//! STM32F407 bindings for the motion kernel.
//!
//! Execution levels, highest priority first, mirroring the kernel's
//! assumptions:
//!
//! - `TIM2` runs the 40 kHz DDA tick.
//! - `TIM4` is a one-shot software interrupt for the loader, `TIM3` the
//!   same for the executor; both fire once shortly after being armed.
//! - `I2C1` is the command transport, slave address 0x10.
//! - `EXTI0`/`EXTI1` watch the Z and R limit switches.
//! - Thread mode runs the controller mainline.
//!
//! Shared state lives in spin-locked `Option` statics populated by
//! `bring_up`. Handlers `expect` their locks: contention at ISR time is a
//! priority-discipline bug, and a loud panic beats silently losing steps.
//! The mainline touches the shared statics only inside short
//! interrupt-free sections.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use stm32f4::stm32f407 as device;
use stm32f4::stm32f407::interrupt;

use crate::command::CommandBuffer;
use crate::controller::{Controller, MachineIo};
use crate::motion::{Motion, Signals};
use crate::priority;
use crate::stepper::{StepPins, F_DDA};
use crate::util::spin_lock::SpinLock;
use crate::Axis;

/// Bus clock for the timers, assuming the usual 168 MHz core clock with
/// APB1 timers at 84 MHz.
const TIMER_HZ: u32 = 84_000_000;

/// Cycles (less one) a software-interrupt timer counts before firing.
const SOFTWARE_INTERRUPT_PERIOD: u32 = 99;

static MOTION: SpinLock<Option<Motion>> = SpinLock::new(None);
static COMMANDS: SpinLock<Option<CommandBuffer>> = SpinLock::new(None);
static STEP_HW: SpinLock<Option<StepHw>> = SpinLock::new(None);
static BUS_HW: SpinLock<Option<device::I2C1>> = SpinLock::new(None);

// Flags shared with ISRs that must not take the big locks.
static LIMIT_HIT: AtomicBool = AtomicBool::new(false);
/// Mirror of the controller status byte for the bus read path.
static STATUS_BYTE: AtomicU8 = AtomicU8::new(0);

/// Signals raised from interrupt context. Folded into the controller's
/// `Signals` at the top of every mainline pass.
static MOTION_COMPLETE: AtomicBool = AtomicBool::new(false);
static DECEL_STARTED: AtomicBool = AtomicBool::new(false);
static ISR_ERROR: AtomicU8 = AtomicU8::new(0);

/// Step/dir/enable GPIO plus the timers the step path owns.
struct StepHw {
    gpioa: device::GPIOA,
    tim2: device::TIM2,
    tim3: device::TIM3,
    tim4: device::TIM4,
}

// Pin assignment on GPIOA:
//   PA0 Z step   PA1 Z dir   PA2 R step   PA3 R dir
//   PA4 driver enable (active low)
//   PA5..PA7 microstep mode bits
const Z_STEP: u32 = 0;
const Z_DIR: u32 = 1;
const R_STEP: u32 = 2;
const R_DIR: u32 = 3;
const ENABLE: u32 = 4;
const MODE0: u32 = 5;

impl StepPins for StepHw {
    fn step(&mut self, axis: Axis) {
        let pin = match axis {
            Axis::Z => Z_STEP,
            Axis::R => R_STEP,
        };
        // Set then immediately clear; the DRV8825 needs ~2 us of high
        // time, which the write-to-write latency at this clock provides.
        self.gpioa.bsrr.write(|w| unsafe { w.bits(1 << pin) });
        self.gpioa.bsrr.write(|w| unsafe { w.bits(1 << (pin + 16)) });
    }

    fn set_direction(&mut self, axis: Axis, reverse: bool) {
        let pin = match axis {
            Axis::Z => Z_DIR,
            Axis::R => R_DIR,
        };
        let bit = if reverse { 1 << pin } else { 1 << (pin + 16) };
        self.gpioa.bsrr.write(|w| unsafe { w.bits(bit) });
    }
}

impl StepHw {
    fn start_dda(&mut self) {
        self.tim2.cnt.write(|w| unsafe { w.bits(0) });
        self.tim2.sr.modify(|_, w| w.uif().clear_bit());
        self.tim2.cr1.modify(|_, w| w.cen().set_bit());
    }

    fn stop_dda(&mut self) {
        self.tim2.cr1.modify(|_, w| w.cen().clear_bit());
    }

    fn arm_exec(&mut self) {
        self.tim3.cnt.write(|w| unsafe { w.bits(0) });
        self.tim3.cr1.modify(|_, w| w.cen().set_bit());
    }

    fn arm_load(&mut self) {
        self.tim4.cnt.write(|w| unsafe { w.bits(0) });
        self.tim4.cr1.modify(|_, w| w.cen().set_bit());
    }

    /// Arms whichever software interrupts the kernel requested and keeps
    /// the DDA timer matched to the kernel's idea of busy.
    fn service_requests(&mut self, motion: &mut Motion) {
        if motion.stepper.take_load_request() {
            self.arm_load();
        }
        if motion.stepper.take_exec_request() {
            self.arm_exec();
        }
        if motion.stepper.busy() {
            self.start_dda();
        }
    }
}

/// GPIO for the mainline-only outputs: host interrupt line (PB0), driver
/// enable and microstep mode (GPIOA shared via BSRR, which is atomic), and
/// the limit switch inputs on GPIOC with their EXTI lines.
struct BoardIo {
    gpioa: device::GPIOA,
    gpiob: device::GPIOB,
    gpioc: device::GPIOC,
    exti: device::EXTI,
}

const HOST_INT: u32 = 0; // PB0, active low
const Z_LIMIT: u32 = 0; // PC0 / EXTI0
const R_LIMIT: u32 = 1; // PC1 / EXTI1

impl MachineIo for BoardIo {
    fn enable_drivers(&mut self) {
        // Active low enable.
        self.gpioa.bsrr.write(|w| unsafe { w.bits(1 << (ENABLE + 16)) });
    }

    fn disable_drivers(&mut self) {
        self.gpioa.bsrr.write(|w| unsafe { w.bits(1 << ENABLE) });
    }

    fn set_microstepping(&mut self, mode: u8) {
        // Mode bits encode the DRV8825 M0..M2 table for 1..32 microsteps.
        let bits = match mode {
            1 => 0b000,
            2 => 0b001,
            3 => 0b010,
            4 => 0b011,
            5 => 0b100,
            6 => 0b101,
            _ => return, // validated upstream
        } as u32;
        let set = bits << MODE0;
        let clear = (!bits & 0b111) << (MODE0 + 16);
        self.gpioa.bsrr.write(|w| unsafe { w.bits(set | clear) });
    }

    fn generate_interrupt(&mut self) {
        self.gpiob
            .bsrr
            .write(|w| unsafe { w.bits(1 << (HOST_INT + 16)) });
        // Hold the line low for the protocol's pulse width even if the
        // delay loop below is interrupted.
        let gpiob = &self.gpiob;
        let _restore = scopeguard::guard((), |_| {
            gpiob.bsrr.write(|w| unsafe { w.bits(1 << HOST_INT) });
        });
        // 50 ms of busy wait; the mainline has nothing better to do while
        // it blocks the batch boundary.
        for _ in 0..(proto::INTERRUPT_PULSE_MS * (TIMER_HZ / 1000) / 4) {
            cortex_m::asm::nop();
        }
    }

    fn axis_at_limit(&self, axis: Axis) -> bool {
        let pin = match axis {
            Axis::Z => Z_LIMIT,
            Axis::R => R_LIMIT,
        };
        // Switches are wired active low with pull-ups.
        self.gpioc.idr.read().bits() & (1 << pin) == 0
    }

    fn arm_limit_interrupt(&mut self, axis: Axis) {
        let line = match axis {
            Axis::Z => Z_LIMIT,
            Axis::R => R_LIMIT,
        };
        self.exti.pr.write(|w| unsafe { w.bits(1 << line) });
        self.exti
            .imr
            .modify(|r, w| unsafe { w.bits(r.bits() | (1 << line)) });
    }

    fn disarm_limit_interrupts(&mut self) {
        self.exti
            .imr
            .modify(|r, w| unsafe { w.bits(r.bits() & !(1 << Z_LIMIT) & !(1 << R_LIMIT)) });
    }
}

/// Initializes peripherals and parks the shared state in the statics.
/// Interrupts must still be globally masked when this is called.
pub fn bring_up(dp: device::Peripherals) -> BoardMain {
    let rcc = &dp.RCC;
    rcc.ahb1enr.modify(|_, w| {
        w.gpioaen().set_bit().gpioben().set_bit().gpiocen().set_bit()
    });
    rcc.apb1enr.modify(|_, w| {
        w.tim2en().set_bit().tim3en().set_bit().tim4en().set_bit().i2c1en().set_bit()
    });

    // GPIOA: step/dir/enable/mode outputs, everything low except enable.
    dp.GPIOA.moder.modify(|_, w| {
        w.moder0().output().moder1().output().moder2().output().moder3().output()
            .moder4().output().moder5().output().moder6().output().moder7().output()
    });
    dp.GPIOA.bsrr.write(|w| unsafe { w.bits(1 << ENABLE) });

    // PB0: host interrupt line, idle high. PB6/PB7: I2C1 SCL/SDA.
    dp.GPIOB.moder.modify(|_, w| {
        w.moder0().output().moder6().alternate().moder7().alternate()
    });
    dp.GPIOB.afrl.modify(|_, w| w.afrl6().af4().afrl7().af4());
    dp.GPIOB.otyper.modify(|_, w| w.ot6().set_bit().ot7().set_bit());
    dp.GPIOB.bsrr.write(|w| unsafe { w.bits(1 << HOST_INT) });

    // PC0/PC1: limit switches with pull-ups, EXTI sources left masked
    // until homing arms them.
    dp.GPIOC.pupdr.modify(|_, w| w.pupdr0().pull_up().pupdr1().pull_up());

    // TIM2: fixed-rate DDA tick, gated on and off around moves.
    dp.TIM2.arr.write(|w| unsafe { w.bits(TIMER_HZ / F_DDA as u32 - 1) });
    dp.TIM2.dier.modify(|_, w| w.uie().set_bit());

    // TIM3/TIM4: one-shot software interrupts.
    dp.TIM3.arr.write(|w| unsafe { w.bits(SOFTWARE_INTERRUPT_PERIOD) });
    dp.TIM3.dier.modify(|_, w| w.uie().set_bit());
    dp.TIM3.cr1.modify(|_, w| w.opm().set_bit());
    dp.TIM4.arr.write(|w| unsafe { w.bits(SOFTWARE_INTERRUPT_PERIOD) });
    dp.TIM4.dier.modify(|_, w| w.uie().set_bit());
    dp.TIM4.cr1.modify(|_, w| w.opm().set_bit());

    // I2C1: slave receiver at the fixed address, interrupts on events and
    // errors.
    dp.I2C1.cr1.modify(|_, w| w.pe().clear_bit());
    dp.I2C1.oar1.write(|w| unsafe { w.bits((proto::SLAVE_ADDRESS as u32) << 1 | (1 << 14)) });
    dp.I2C1.cr2.modify(|_, w| w.itevten().set_bit().iterren().set_bit().itbufen().set_bit());
    dp.I2C1.cr1.modify(|_, w| w.pe().set_bit().ack().set_bit());

    *MOTION.try_lock().unwrap() = Some(Motion::default());
    *COMMANDS.try_lock().unwrap() = Some(CommandBuffer::default());
    *STEP_HW.try_lock().unwrap() = Some(StepHw {
        // GPIOA is shared with the mainline's BoardIo; both sides touch
        // only BSRR, whose writes are atomic, so the alias is benign.
        gpioa: unsafe { core::ptr::read(&dp.GPIOA) },
        tim2: dp.TIM2,
        tim3: dp.TIM3,
        tim4: dp.TIM4,
    });
    *BUS_HW.try_lock().unwrap() = Some(dp.I2C1);

    BoardMain {
        controller: Controller::default(),
        signals: Signals::default(),
        io: BoardIo {
            gpioa: dp.GPIOA,
            gpiob: dp.GPIOB,
            gpioc: dp.GPIOC,
            exti: dp.EXTI,
        },
    }
}

/// Thread-mode state: the controller and its board I/O.
pub struct BoardMain {
    controller: Controller,
    signals: Signals,
    io: BoardIo,
}

impl BoardMain {
    /// The controller mainline. Never returns.
    pub fn run(mut self) -> ! {
        loop {
            // Fold ISR-raised flags into the signals struct.
            if LIMIT_HIT.swap(false, Ordering::AcqRel) {
                self.signals.limit_hit = true;
            }
            if MOTION_COMPLETE.swap(false, Ordering::AcqRel) {
                self.signals.motion_complete = true;
            }
            if DECEL_STARTED.swap(false, Ordering::AcqRel) {
                self.signals.deceleration_started = true;
            }
            let isr_error = ISR_ERROR.swap(0, Ordering::AcqRel);
            if isr_error != 0 {
                if let Some(status) = proto::Status::from_byte(isr_error) {
                    self.signals.raise_error(status);
                }
            }

            // One controller pass under masked interrupts: the kernel's
            // invariants assume planning is not preempted by the executor.
            cortex_m::interrupt::free(|_| {
                let mut motion = MOTION.try_lock().expect("motion lock in mainline");
                let motion = motion.as_mut().expect("mainline before bring_up");
                let mut commands = COMMANDS.try_lock().expect("command lock in mainline");
                let commands = commands.as_mut().expect("mainline before bring_up");

                self.controller
                    .poll(motion, &mut self.signals, commands, &mut self.io);

                let mut hw = STEP_HW.try_lock().expect("step hw in mainline");
                hw.as_mut().unwrap().service_requests(motion);
            });

            STATUS_BYTE.store(self.signals.status.into(), Ordering::Release);
        }
    }
}

#[interrupt]
fn TIM2() {
    let mut hw = STEP_HW.try_lock().expect("step hw at DDA ISR");
    let hw = hw.as_mut().expect("DDA ISR before bring_up");
    hw.tim2.sr.modify(|_, w| w.uif().clear_bit());

    let mut motion = MOTION.try_lock().expect("motion at DDA ISR");
    let motion = motion.as_mut().expect("DDA ISR before bring_up");

    let mut signals = Signals::default();
    // Safety: this is the step timer ISR.
    motion.dda_isr(&mut signals, hw, unsafe { &priority::Step::new() });
    publish(&signals);

    if !motion.stepper.busy() {
        hw.stop_dda();
    }
    hw.service_requests(motion);
}

#[interrupt]
fn TIM3() {
    let mut hw = STEP_HW.try_lock().expect("step hw at exec ISR");
    let hw = hw.as_mut().expect("exec ISR before bring_up");
    hw.tim3.sr.modify(|_, w| w.uif().clear_bit());

    let mut motion = MOTION.try_lock().expect("motion at exec ISR");
    let motion = motion.as_mut().expect("exec ISR before bring_up");

    let mut signals = Signals::default();
    // Safety: this is the exec software interrupt.
    motion.exec_isr(&mut signals, unsafe { &priority::Swi::new() });
    publish(&signals);
    hw.service_requests(motion);
}

#[interrupt]
fn TIM4() {
    let mut hw = STEP_HW.try_lock().expect("step hw at load ISR");
    let hw = hw.as_mut().expect("load ISR before bring_up");
    hw.tim4.sr.modify(|_, w| w.uif().clear_bit());

    let mut motion = MOTION.try_lock().expect("motion at load ISR");
    let motion = motion.as_mut().expect("load ISR before bring_up");

    let mut signals = Signals::default();
    // Safety: this is the load software interrupt.
    let prio = unsafe { priority::Swi::new() };
    motion.load_isr(&mut signals, hw, &prio);
    publish(&signals);
    hw.service_requests(motion);
}

/// Records ISR-raised signal flags into the atomics the mainline folds in.
fn publish(signals: &Signals) {
    if signals.motion_complete {
        MOTION_COMPLETE.store(true, Ordering::Release);
    }
    if signals.deceleration_started {
        DECEL_STARTED.store(true, Ordering::Release);
    }
    if signals.error {
        ISR_ERROR.store(signals.status.into(), Ordering::Release);
    }
}

#[interrupt]
fn I2C1_EV() {
    let mut bus = BUS_HW.try_lock().expect("bus at I2C ISR");
    let bus = bus.as_mut().expect("I2C ISR before bring_up");
    let sr1 = bus.sr1.read();

    if sr1.addr().bit_is_set() {
        // Address matched; reading SR2 clears the flag.
        let _ = bus.sr2.read();
    }

    if sr1.rx_ne().bit_is_set() {
        let byte = bus.dr.read().bits() as u8;
        let mut commands = COMMANDS.try_lock().expect("commands at I2C ISR");
        commands
            .as_mut()
            .expect("I2C ISR before bring_up")
            .add_command_byte(byte);
    }

    if sr1.tx_e().bit_is_set() {
        // Status register read: serve the mirrored status byte.
        bus.dr
            .write(|w| unsafe { w.bits(STATUS_BYTE.load(Ordering::Acquire) as u32) });
    }

    if sr1.stopf().bit_is_set() {
        // Clearing STOPF: read SR1 (done above) then write CR1.
        bus.cr1.modify(|_, w| w.pe().set_bit());
    }
}

#[interrupt]
fn I2C1_ER() {
    // Bus fault: reset the peripheral and drop back to slave receive.
    let mut bus = BUS_HW.try_lock().expect("bus at I2C error ISR");
    let bus = bus.as_mut().expect("I2C ISR before bring_up");
    bus.sr1.write(|w| unsafe { w.bits(0) });
    bus.cr1.modify(|_, w| w.swrst().set_bit());
    bus.cr1.modify(|_, w| w.swrst().clear_bit());
    bus.oar1
        .write(|w| unsafe { w.bits((proto::SLAVE_ADDRESS as u32) << 1 | (1 << 14)) });
    bus.cr2
        .modify(|_, w| w.itevten().set_bit().iterren().set_bit().itbufen().set_bit());
    bus.cr1.modify(|_, w| w.pe().set_bit().ack().set_bit());
}

#[interrupt]
fn EXTI0() {
    limit_isr(Z_LIMIT);
}

#[interrupt]
fn EXTI1() {
    limit_isr(R_LIMIT);
}

/// Limit switch pin change: record the hit and immediately re-mask the
/// line so switch bounce cannot storm the controller.
fn limit_isr(line: u32) {
    // Safety: EXTI PR/IMR bit twiddling for our own line only.
    let exti = unsafe { &*device::EXTI::ptr() };
    exti.pr.write(|w| unsafe { w.bits(1 << line) });
    exti.imr
        .modify(|r, w| unsafe { w.bits(r.bits() & !(1 << line)) });
    LIMIT_HIT.store(true, Ordering::Release);
}
