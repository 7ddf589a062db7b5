//! Context switch implementation.
//!
//! This is the one place where a task's identity actually changes: the
//! outgoing task's callee-saved registers are pushed onto its own kernel
//! stack, the resulting ESP is stored through `prev_slot`, and ESP is
//! reloaded from `next_slot`. Everything else about a switch (picking the
//! next task, CR3, TSS) happens in the scheduler before this is called.

/// Perform a context switch.
///
/// `prev_slot` and `next_slot` point at the `kstack_top` field of the
/// outgoing and incoming task control blocks.
///
/// For a task that has run before, the restored ESP points at a frame this
/// function pushed earlier, so the final `ret` lands back at its call site
/// inside `schedule()`. For a freshly created task, the stack was
/// hand-built so that `ret` lands in the entry trampoline instead, with
/// the trampoline's argument already in place above a fake return address.
///
/// # Safety
///
/// - Both slots must point at live, 4 KiB-page-backed task control blocks.
/// - Must be called with interrupts disabled; the saved frame does not
///   include EFLAGS.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub unsafe extern "C" fn switch_to(_prev_slot: *mut usize, _next_slot: *const usize) {
    // cdecl: [esp+4] = prev_slot, [esp+8] = next_slot.
    // After the four pushes the arguments sit 16 bytes deeper.
    core::arch::naked_asm!(
        // ── Save outgoing context ──
        "push ebp",
        "push ebx",
        "push edi",
        "push esi",
        "mov eax, [esp + 20]",
        "mov [eax], esp",
        // ── Restore incoming context ──
        "mov eax, [esp + 24]",
        "mov esp, [eax]",
        "pop esi",
        "pop edi",
        "pop ebx",
        "pop ebp",
        // `ret` pops the return address from the new stack: the call site
        // in `schedule()` for a resumed task, the entry trampoline for a
        // new one.
        "ret",
    );
}

#[cfg(not(target_arch = "x86"))]
pub unsafe extern "C" fn switch_to(_prev_slot: *mut usize, _next_slot: *const usize) {
    unimplemented!("context switch is only available on x86");
}
