use crate::hal::boot::Launch;

/// Launcher that can't actually jump, so it panics with the values it
/// would have jumped with. Tests match on the message.
#[derive(Debug, Default)]
pub struct MockLauncher;

impl Launch for MockLauncher {
    fn launch(&mut self, stack_pointer: u32, entry: u32, vector_table: u32) -> ! {
        panic!(
            "launch sp={:#010x} entry={:#010x} vtor={:#010x}",
            stack_pointer, entry, vector_table
        );
    }
}
