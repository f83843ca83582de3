#![no_main]
use libfuzzer_sys::fuzz_target;
use zenio::{ImageInput, Limits, Registry};

fuzz_target!(|data: &[u8]| {
    let registry = Registry::with_builtins();
    let limits = Limits {
        max_pixels: Some(1 << 20),
        max_memory_bytes: Some(64 << 20),
        ..Limits::default()
    };
    // Open through each backend, and by sniffing; must never panic.
    for ext in ["ppm", "ff", "trf", "bin"] {
        let path = std::env::temp_dir().join(format!("zenio-fuzz-{}.{ext}", std::process::id()));
        if std::fs::write(&path, data).is_err() {
            return;
        }
        if let Ok(mut input) = ImageInput::open_with(&registry, &path, &limits, &enough::Unstoppable) {
            let _ = input.read_image();
        }
        let _ = std::fs::remove_file(&path);
    }
});
