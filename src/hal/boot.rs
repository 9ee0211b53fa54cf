//! Control transfer to a loaded image.

/// One way jump into an image, given its initial stack pointer, its
/// entry point and the base of its interrupt vector table.
pub trait Launch {
    fn launch(&mut self, stack_pointer: u32, entry: u32, vector_table: u32) -> !;
}
