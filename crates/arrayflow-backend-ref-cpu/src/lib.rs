pub mod cpu;

pub use cpu::CpuBackend;

/// Makes the interpreter available as `"cpu"` and `"ref-cpu"` in the global
/// registry. Runs at load time; calling it again only replaces the entries.
pub fn register_cpu_backend() {
    arrayflow::backend::register_backend("cpu", || std::sync::Arc::new(CpuBackend::new()));
    arrayflow::backend::register_backend("ref-cpu", || std::sync::Arc::new(CpuBackend::new()));
}

#[cfg(not(target_family = "wasm"))]
#[used]
#[link_section = ".init_array"]
static REGISTER_CPU_BACKEND: extern "C" fn() = {
    extern "C" fn register() {
        register_cpu_backend();
    }
    register
};
