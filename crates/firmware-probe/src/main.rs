// AVR Probe - Toolchain Instruction Probe
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Instruction probe firmware.
//!
//! Not meant to do anything useful at run time: build it, then run
//! `avr-probe check --firmware <elf>` (or `avr-objdump -d`) over
//! `instruction_probe` to see which instructions the toolchain emitted for
//! each statement.

#![no_std]
#![no_main]
#![feature(asm_experimental_arch)]

use core::arch::asm;
use core::cell::UnsafeCell;
use core::num::NonZeroU8;
use core::ptr::{read_volatile, write_volatile};
use panic_halt as _;

/// Returned by [`instruction_probe`].
pub const PROBE_OK: i16 = 0;

#[inline(always)]
fn load<T: Copy>(cell: &UnsafeCell<T>) -> T {
    // SAFETY: the cell is a live local and never aliased mutably.
    unsafe { read_volatile(cell.get()) }
}

#[inline(always)]
fn store<T>(cell: &UnsafeCell<T>, value: T) {
    // SAFETY: see `load`.
    unsafe { write_volatile(cell.get(), value) }
}

#[no_mangle]
#[inline(never)]
pub extern "C" fn instruction_probe() -> i16 {
    let a = UnsafeCell::new(0u8);
    let b = UnsafeCell::new(0u8);
    let result = UnsafeCell::new(0u8);
    store(&a, 10);
    store(&b, 20);

    // Arithmetic
    store(&result, load(&a).wrapping_add(load(&b))); // add
    store(&result, load(&a).wrapping_sub(load(&b))); // sub
    store(&result, load(&a).wrapping_mul(load(&b))); // mul, or a libcall without one
    // SAFETY: `b` holds 20. No zero check is emitted for a `NonZeroU8` divisor.
    let divisor = unsafe { NonZeroU8::new_unchecked(load(&b)) };
    store(&result, load(&a) / divisor); // __udivmodqi4

    // Bitwise
    store(&result, load(&a) & load(&b)); // and
    store(&result, load(&a) | load(&b)); // or
    store(&result, load(&a) ^ load(&b)); // eor
    store(&result, !load(&a)); // com

    // Shifts
    store(&result, load(&a) << 1); // lsl
    store(&result, load(&a) >> 1); // lsr

    // Compare + branch
    if load(&a) < load(&b) {
        store(&result, 1);
    }

    // Word arithmetic
    let wide = UnsafeCell::new(0u16);
    store(&wide, 0x1234);
    store(&wide, load(&wide).wrapping_add(5)); // adiw

    // Interrupt mask
    avr_device::interrupt::disable(); // cli
    // SAFETY: no interrupt handlers are installed, nothing can preempt us.
    unsafe { avr_device::interrupt::enable() }; // sei

    // Indirect store and load
    let ptr: *mut u8 = a.get();
    // SAFETY: `ptr` points at the live local `a`.
    unsafe {
        write_volatile(ptr, 42); // st
        store(&result, read_volatile(ptr)); // ld
    }

    // SAFETY: neither touches memory, registers or flags.
    unsafe {
        asm!("nop", options(nomem, nostack, preserves_flags));
        asm!("wdr", options(nomem, nostack, preserves_flags));
    }

    #[cfg(feature = "fmul")]
    {
        let fmul_a: u8 = 0x80;
        let fmul_b: u8 = 0x40;
        let fmul_result: u16;
        // fmuls only takes r16..r23 and leaves the product in r1:r0. r0 is the
        // scratch register and r1 must read as zero again once the block ends.
        // SAFETY: only the output pair, r0 and r1 are written.
        unsafe {
            asm!(
                "fmuls r16, r17",
                "movw {out}, r0",
                "clr r1",
                out = out(reg_pair) fmul_result,
                in("r16") fmul_a,
                in("r17") fmul_b,
                options(nomem, nostack),
            );
        }
        let sink = UnsafeCell::new(0u16);
        store(&sink, fmul_result);
    }

    PROBE_OK
}

#[avr_device::entry]
fn main() -> ! {
    let _ = instruction_probe();

    loop {
        avr_device::asm::sleep();
    }
}
