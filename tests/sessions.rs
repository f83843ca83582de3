use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use enough::StopReason;
use tempfile::tempdir;
use zenio::*;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn crop_window_roundtrip() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("crop.trf");
    let spec = ImageSpec::new(16, 16, 3, ElementType::U8)
        .unwrap()
        .with_origin(32, 128)
        .unwrap()
        .with_full_window(0, 0, 640, 480)
        .unwrap();
    assert_eq!(spec.scanline_bytes(), 48);

    let mut out = registry.create_output(&file).unwrap();
    out.open(&file, &spec).unwrap();
    for y in 128..144 {
        let row = vec![y as u8; spec.scanline_bytes()];
        out.write_scanline(y, 0, &row).unwrap();
    }
    assert_eq!(out.progress(), (16, 16));
    // Rows outside the data window are rejected.
    let row = vec![0u8; 48];
    assert!(matches!(
        out.write_scanline(127, 0, &row),
        Err(ImageIoError::OutOfBounds { .. })
    ));
    assert!(matches!(
        out.write_scanline(144, 0, &row),
        Err(ImageIoError::OutOfBounds { .. })
    ));
    out.close().unwrap();

    let mut input = registry.open_input(&file).unwrap();
    let read = input.spec();
    assert_eq!((read.x(), read.y(), read.width(), read.height()), (32, 128, 16, 16));
    assert_eq!(read.full_window(), (0, 0, 640, 480));
    assert!(read.is_cropped());
    let mut buf = vec![0u8; 48];
    input.read_scanline(135, 0, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 135));
}

#[test]
fn four_tile_grid() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("grid.trf");
    let spec = ImageSpec::new(128, 128, 1, ElementType::U8)
        .unwrap()
        .with_tiles(64, 64)
        .unwrap();
    assert_eq!((spec.tiles_across(), spec.tiles_down()), (2, 2));

    let mut out = registry.create_output(&file).unwrap();
    assert!(out.supports("tiles"));
    out.open(&file, &spec).unwrap();
    for (i, (x, y)) in [(64, 64), (0, 0), (64, 0), (0, 64)].into_iter().enumerate() {
        let tile = vec![i as u8 + 1; spec.tile_bytes()];
        out.write_tile(x, y, 0, &tile).unwrap();
    }
    assert_eq!(out.progress(), (4, 4));

    let tile = vec![0u8; spec.tile_bytes()];
    assert!(matches!(
        out.write_tile(32, 0, 0, &tile),
        Err(ImageIoError::AlignmentError {
            x: 32,
            y: 0,
            tile_width: 64,
            tile_height: 64
        })
    ));
    assert!(matches!(
        out.write_tile(128, 0, 0, &tile),
        Err(ImageIoError::OutOfBounds { .. })
    ));
    assert!(matches!(
        out.write_tile(0, 0, 0, &tile[1..]),
        Err(ImageIoError::SizeMismatch { .. })
    ));
    assert!(matches!(
        out.write_scanline(0, 0, &[0u8; 128]),
        Err(ImageIoError::Unsupported(_))
    ));
    out.close().unwrap();

    let mut input = registry.open_input(&file).unwrap();
    let mut buf = vec![0u8; spec.tile_bytes()];
    input.read_tile(64, 0, 0, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 3));
    input.read_tile(0, 64, 0, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 4));
    input.read_tile(64, 64, 0, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 1));
}

#[test]
fn edge_tiles_read_back_zero_padded() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("edge.trf");
    let spec = ImageSpec::new(10, 10, 1, ElementType::U8)
        .unwrap()
        .with_tiles(8, 8)
        .unwrap();
    let mut out = registry.create_output(&file).unwrap();
    out.open(&file, &spec).unwrap();
    out.write_tile(8, 8, 0, &[9u8; 64]).unwrap();
    out.close().unwrap();

    let mut input = registry.open_input(&file).unwrap();
    let mut buf = vec![0xaau8; 64];
    input.read_tile(8, 8, 0, &mut buf).unwrap();
    for (i, &b) in buf.iter().enumerate() {
        let inside = i % 8 < 2 && i / 8 < 2;
        assert_eq!(b, if inside { 9 } else { 0 }, "pixel {i}");
    }
}

#[test]
fn capability_gate() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("gate.ppm");
    let mut out = registry.create_output(&file).unwrap();
    assert!(!out.supports("tiles"));
    assert!(!out.supports("origin"));
    assert!(!out.supports("no_such_feature"));

    let tiled = ImageSpec::new(64, 64, 3, ElementType::U8)
        .unwrap()
        .with_tiles(32, 32)
        .unwrap();
    assert!(matches!(
        out.open(&file, &tiled),
        Err(ImageIoError::OpenError { .. })
    ));
    assert_eq!(out.state(), SessionState::Closed);

    let plain = tiled.without_tiles();
    out.open(&file, &plain).unwrap();
    assert!(matches!(
        out.write_tile(0, 0, 0, &vec![0u8; 32 * 32 * 3]),
        Err(ImageIoError::Unsupported(_))
    ));
    out.close().unwrap();
}

#[test]
fn origin_rejected_by_pnm() {
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("origin.ppm");
    let spec = ImageSpec::new(4, 4, 3, ElementType::U8)
        .unwrap()
        .with_origin(10, 10)
        .unwrap();
    let mut out = registry.create_output(&file).unwrap();
    assert!(matches!(
        out.open(&file, &spec),
        Err(ImageIoError::OpenError { .. })
    ));
}

#[test]
fn close_is_idempotent() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("close.ppm");
    let spec = ImageSpec::new(2, 2, 3, ElementType::U8).unwrap();
    let mut out = registry.create_output(&file).unwrap();
    // Closing a never-opened session is a no-op.
    out.close().unwrap();
    out.open(&file, &spec).unwrap();
    out.write_image(&[0u8; 12]).unwrap();
    out.close().unwrap();
    out.close().unwrap();
    assert_eq!(out.state(), SessionState::Finished);
    assert!(matches!(
        out.write_scanline(0, 0, &[0u8; 6]),
        Err(ImageIoError::InvalidState { .. })
    ));
    assert!(matches!(
        out.open(&file, &spec),
        Err(ImageIoError::InvalidState { .. })
    ));

    let mut input = registry.open_input(&file).unwrap();
    input.close().unwrap();
    input.close().unwrap();
    assert!(!input.is_open());
    assert!(matches!(
        input.read_scanline(0, 0, &mut [0u8; 6]),
        Err(ImageIoError::InvalidState { .. })
    ));
}

#[test]
fn unsupported_format() {
    let registry = Registry::with_builtins();
    assert!(matches!(
        registry.create_output("image.tif"),
        Err(ImageIoError::UnsupportedFormat(_))
    ));

    let dir = tempdir().unwrap();
    let file = dir.path().join("unknown.bin");
    std::fs::write(&file, b"GIF89a not really").unwrap();
    assert!(matches!(
        registry.open_input(&file),
        Err(ImageIoError::UnsupportedFormat(_))
    ));
}

#[test]
fn missing_input_file() {
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let path = dir.path().join("does-not-exist.ppm");
    assert!(matches!(
        registry.open_input(&path),
        Err(ImageIoError::OpenError { .. })
    ));
}

#[test]
fn sequential_backend_enforces_order() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("seq.ff");
    let spec = ImageSpec::new(2, 4, 4, ElementType::U16).unwrap();
    let stride = spec.scanline_bytes();
    let mut out = registry.create_output(&file).unwrap();
    assert!(!out.supports("random_access"));
    out.open(&file, &spec).unwrap();

    out.write_scanline(0, 0, &vec![1u8; stride]).unwrap();
    // A row cannot be written twice.
    assert!(matches!(
        out.write_scanline(0, 0, &vec![1u8; stride]),
        Err(ImageIoError::SequenceError {
            expected: 1,
            actual: 0
        })
    ));
    // Row 1 is skipped and ends up as zeros.
    out.write_scanline(2, 0, &vec![2u8; stride]).unwrap();
    assert!(matches!(
        out.write_scanline(1, 0, &vec![3u8; stride]),
        Err(ImageIoError::SequenceError {
            expected: 3,
            actual: 1
        })
    ));
    assert!(matches!(
        out.write_image(&vec![0u8; spec.image_bytes()]),
        Err(ImageIoError::SequenceError { .. })
    ));
    // Row 3 never arrives; close pads it.
    out.close().unwrap();
    assert_eq!(
        std::fs::metadata(&file).unwrap().len(),
        16 + spec.image_bytes() as u64
    );

    let mut input = registry.open_input(&file).unwrap();
    assert!(!input.supports("random_access"));
    let mut buf = vec![0u8; stride];
    input.read_scanline(1, 0, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
    input.read_scanline(2, 0, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 2));
    assert!(matches!(
        input.read_scanline(0, 0, &mut buf),
        Err(ImageIoError::SequenceError { .. })
    ));
}

#[test]
fn buffered_backend_accepts_any_order() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("any-order.pgm");
    let spec = ImageSpec::new(3, 3, 1, ElementType::U8).unwrap();
    let mut out = registry.create_output(&file).unwrap();
    out.open(&file, &spec).unwrap();
    for y in [2, 0, 1, 0] {
        out.write_scanline(y, 0, &[y as u8 + 10; 3]).unwrap();
    }
    out.close().unwrap();

    let mut input = registry.open_input(&file).unwrap();
    assert_eq!(
        input.read_image().unwrap(),
        [10, 10, 10, 11, 11, 11, 12, 12, 12]
    );
}

#[test]
fn size_mismatch_on_scanline() {
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("size.ppm");
    let spec = ImageSpec::new(4, 2, 3, ElementType::U8).unwrap();
    let mut out = registry.create_output(&file).unwrap();
    out.open(&file, &spec).unwrap();
    assert!(matches!(
        out.write_scanline(0, 0, &[0u8; 11]),
        Err(ImageIoError::SizeMismatch {
            expected: 12,
            actual: 11
        })
    ));
    assert!(matches!(
        out.write_scanline(0, 1, &[0u8; 12]),
        Err(ImageIoError::OutOfBounds { z: 1, .. })
    ));
    assert!(matches!(
        out.write_image(&[0u8; 23]),
        Err(ImageIoError::SizeMismatch { .. })
    ));
}

#[test]
fn spec_is_snapshotted_at_open() {
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("snapshot.trf");
    let spec = ImageSpec::new(8, 8, 1, ElementType::U8).unwrap();
    let mut out = registry.create_output(&file).unwrap();
    out.open(&file, &spec).unwrap();
    let changed = spec.clone().with_tiles(4, 4).unwrap();
    assert_ne!(out.spec(), Some(&changed));
    assert_eq!(out.spec(), Some(&spec));
    out.close().unwrap();
}

#[test]
fn attributes_roundtrip_through_trf() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("attrs.trf");
    let spec = ImageSpec::new(2, 2, 1, ElementType::U8)
        .unwrap()
        .with_attribute("Software", "zenio")
        .with_attribute("comment", "two words");
    let mut out = registry.create_output(&file).unwrap();
    assert!(out.supports("arbitrary_metadata"));
    out.open(&file, &spec).unwrap();
    out.write_image(&[1, 2, 3, 4]).unwrap();
    out.close().unwrap();

    let input = registry.open_input(&file).unwrap();
    assert_eq!(input.spec().attribute("Software"), Some("zenio"));
    assert_eq!(input.spec().attribute("comment"), Some("two words"));
    assert_eq!(input.spec(), &spec);
}

#[test]
fn attributes_dropped_by_pnm() {
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("attrs.pgm");
    let spec = ImageSpec::new(2, 2, 1, ElementType::U8)
        .unwrap()
        .with_attribute("comment", "lost");
    let mut out = registry.create_output(&file).unwrap();
    out.open(&file, &spec).unwrap();
    assert_eq!(out.spec().unwrap().attributes().count(), 0);
    out.write_image(&[0; 4]).unwrap();
    out.close().unwrap();

    let input = registry.open_input(&file).unwrap();
    assert_eq!(input.spec().attribute("comment"), None);
}

#[test]
fn limits_are_enforced() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("limits.trf");
    let spec = ImageSpec::new(20, 20, 1, ElementType::U8).unwrap();
    let limits = Limits {
        max_pixels: Some(100),
        ..Limits::default()
    };

    let mut out = registry
        .create_output(&file)
        .unwrap()
        .with_limits(limits.clone());
    assert!(matches!(
        out.open(&file, &spec),
        Err(ImageIoError::LimitExceeded(_))
    ));

    let mut out = registry.create_output(&file).unwrap();
    out.open(&file, &spec).unwrap();
    out.write_image(&[0u8; 400]).unwrap();
    out.close().unwrap();

    assert!(matches!(
        ImageInput::open_with(&registry, &file, &limits, &Unstoppable),
        Err(ImageIoError::LimitExceeded(_))
    ));
    assert!(ImageInput::open(&registry, &file).is_ok());
}

#[test]
fn drop_finalizes_file() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("dropped.ppm");
    let spec = ImageSpec::new(2, 1, 3, ElementType::U8).unwrap();
    {
        let mut out = registry.create_output(&file).unwrap();
        out.open(&file, &spec).unwrap();
        out.write_scanline(0, 0, &[1, 2, 3, 4, 5, 6]).unwrap();
    }
    let mut input = registry.open_input(&file).unwrap();
    assert_eq!(input.read_image().unwrap(), [1, 2, 3, 4, 5, 6]);
}

#[test]
fn truncated_file_is_rejected() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("short.trf");
    let spec = ImageSpec::new(8, 8, 1, ElementType::U8).unwrap();
    let mut out = registry.create_output(&file).unwrap();
    out.open(&file, &spec).unwrap();
    out.write_image(&[7u8; 64]).unwrap();
    out.close().unwrap();

    let bytes = std::fs::read(&file).unwrap();
    std::fs::write(&file, &bytes[..bytes.len() - 10]).unwrap();
    assert!(matches!(
        registry.open_input(&file),
        Err(ImageIoError::UnexpectedEof)
    ));
}

#[test]
fn concurrent_sessions_share_the_registry() {
    init_logs();
    let registry = initialize_registry();
    assert!(std::ptr::eq(registry, zenio::registry().unwrap()));

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            std::thread::spawn(move || {
                let dir = tempdir().unwrap();
                let file = dir.path().join(format!("thread{t}.trf"));
                let spec = ImageSpec::new(32, 32, 2, ElementType::U8)
                    .unwrap()
                    .with_tiles(16, 16)
                    .unwrap();
                let pixels = vec![t; spec.image_bytes()];
                let mut out = create_output(&file).unwrap();
                out.open(&file, &spec).unwrap();
                out.write_image(&pixels).unwrap();
                out.close().unwrap();

                let mut input = open_input(&file).unwrap();
                assert_eq!(input.read_image().unwrap(), pixels);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn trf_header_with_overflowing_tile_payload_is_rejected() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("huge.trf");

    // 1024x1, u32::MAX channels of u8, 1x2^30 tiles: every field is valid on
    // its own but the padded tile payload does not fit in 64 bits.
    let mut header = b"TRF\x01".to_vec();
    for v in [1024u32, 1, u32::MAX] {
        header.extend_from_slice(&v.to_le_bytes());
    }
    header.extend_from_slice(&[1, 0, 0, 0]);
    for v in [0i32, 0, 0, 0] {
        header.extend_from_slice(&v.to_le_bytes());
    }
    for v in [1024u32, 1, 1, 1 << 30, 0] {
        header.extend_from_slice(&v.to_le_bytes());
    }
    assert_eq!(header.len(), 56);
    std::fs::write(&file, &header).unwrap();

    assert!(matches!(
        registry.open_input(&file),
        Err(ImageIoError::DimensionsTooLarge { .. })
    ));
}

#[test]
fn pnm_payload_over_memory_limit_is_rejected_before_reading() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let limits = Limits {
        max_memory_bytes: Some(1 << 20),
        ..Limits::default()
    };

    // The header promises 3.6 GB; only the header is on disk.
    let claimed = dir.path().join("claimed.pgm");
    std::fs::write(&claimed, b"P5\n60000 60000\n255\n").unwrap();
    assert!(matches!(
        ImageInput::open_with(&registry, &claimed, &limits, &Unstoppable),
        Err(ImageIoError::LimitExceeded(_))
    ));

    let real = dir.path().join("real.pgm");
    let spec = ImageSpec::new(2048, 1024, 1, ElementType::U8).unwrap();
    let mut out = registry.create_output(&real).unwrap();
    out.open(&real, &spec).unwrap();
    out.write_image(&vec![5u8; spec.image_bytes()]).unwrap();
    out.close().unwrap();
    assert!(matches!(
        ImageInput::open_with(&registry, &real, &limits, &Unstoppable),
        Err(ImageIoError::LimitExceeded(_))
    ));
    let mut input = ImageInput::open(&registry, &real).unwrap();
    assert!(input.read_image().unwrap().iter().all(|&b| b == 5));
}

#[test]
fn pnm_header_longer_than_one_read() {
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("chatty.pgm");
    let mut data = b"P5\n".to_vec();
    for i in 0..100 {
        data.extend_from_slice(format!("# comment line {i} padding the header out\n").as_bytes());
    }
    data.extend_from_slice(b"3 1\n255\n\x07\x08\x09");
    std::fs::write(&file, &data).unwrap();

    let mut input = registry.open_input(&file).unwrap();
    assert_eq!((input.spec().width(), input.spec().height()), (3, 1));
    assert_eq!(input.read_image().unwrap(), [7, 8, 9]);

    std::fs::write(&file, &data[..data.len() - 1]).unwrap();
    assert!(matches!(
        registry.open_input(&file),
        Err(ImageIoError::UnexpectedEof)
    ));
}

/// Stop token that trips on its `limit`th check.
struct CancelAfter {
    checks: AtomicUsize,
    limit: usize,
}

impl CancelAfter {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            checks: AtomicUsize::new(0),
            limit,
        })
    }
}

impl Stop for CancelAfter {
    fn check(&self) -> Result<(), StopReason> {
        if self.checks.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
            Err(StopReason::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[test]
fn cancelled_sequential_write_resumes_with_scanlines() {
    init_logs();
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("cancel.ff");
    let spec = ImageSpec::new(1, 40, 4, ElementType::U16).unwrap();
    let stride = spec.scanline_bytes();
    let pixels: Vec<u8> = (0..40u8).flat_map(|y| vec![y; stride]).collect();

    let mut out = registry
        .create_output(&file)
        .unwrap()
        .with_stop(CancelAfter::new(2));
    out.open(&file, &spec).unwrap();
    assert!(matches!(
        out.write_image(&pixels),
        Err(ImageIoError::Cancelled(StopReason::Cancelled))
    ));
    // Rows 0..16 went out before the second check at row 16.
    assert_eq!(out.progress(), (16, 40));
    assert_eq!(out.state(), SessionState::Writing);
    assert!(matches!(
        out.write_scanline(15, 0, &pixels[..stride]),
        Err(ImageIoError::SequenceError {
            expected: 16,
            actual: 15
        })
    ));
    for y in 16..40 {
        let start = y as usize * stride;
        out.write_scanline(y, 0, &pixels[start..start + stride]).unwrap();
    }
    assert_eq!(out.progress(), (40, 40));
    out.close().unwrap();

    let mut input = registry.open_input(&file).unwrap();
    assert_eq!(input.read_image().unwrap(), pixels);
}

#[test]
fn cancelled_tiled_write_reports_cancelled() {
    let registry = Registry::with_builtins();
    let dir = tempdir().unwrap();
    let file = dir.path().join("cancel.trf");
    let spec = ImageSpec::new(64, 64, 1, ElementType::U8)
        .unwrap()
        .with_tiles(16, 16)
        .unwrap();
    let mut out = registry
        .create_output(&file)
        .unwrap()
        .with_stop(CancelAfter::new(1));
    out.open(&file, &spec).unwrap();
    assert!(matches!(
        out.write_image(&vec![0u8; spec.image_bytes()]),
        Err(ImageIoError::Cancelled(_))
    ));
    // Random-access backends can simply be written again.
    out.write_tile(0, 0, 0, &vec![1u8; spec.tile_bytes()]).unwrap();
}

/// Backend whose files fail on the first scanline and on close.
struct FailingBackend {
    released: Arc<AtomicBool>,
}

static FAILING_CAPS: BackendCapabilities =
    BackendCapabilities::new().with_write_order(WriteOrder::RandomAccess);

impl FormatBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["fail"]
    }

    fn identify(&self, header: &[u8]) -> bool {
        header.starts_with(b"FAIL")
    }

    fn capabilities(&self) -> &'static BackendCapabilities {
        &FAILING_CAPS
    }

    fn check_spec(&self, _path: &Path, _spec: &ImageSpec) -> Result<(), ImageIoError> {
        Ok(())
    }

    fn create_writer(&self) -> Box<dyn FormatWriter> {
        Box::new(FailingWriter {
            file: None,
            released: Arc::clone(&self.released),
        })
    }

    fn create_reader(&self) -> Box<dyn FormatReader> {
        Box::new(FailingReader)
    }
}

struct FailingWriter {
    file: Option<File>,
    released: Arc<AtomicBool>,
}

impl Drop for FailingWriter {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl FormatWriter for FailingWriter {
    fn open(&mut self, file: File, _path: &Path, _spec: &ImageSpec) -> Result<(), ImageIoError> {
        self.file = Some(file);
        Ok(())
    }

    fn write_scanline(&mut self, _row: u32, _data: &[u8]) -> Result<(), ImageIoError> {
        Err(std::io::Error::other("disk full").into())
    }

    fn close(&mut self, _stop: &dyn Stop) -> Result<(), ImageIoError> {
        self.file = None;
        Err(std::io::Error::other("flush failed").into())
    }
}

struct FailingReader;

impl FormatReader for FailingReader {
    fn open(
        &mut self,
        _file: File,
        _limits: &Limits,
        _stop: &dyn Stop,
    ) -> Result<ImageSpec, ImageIoError> {
        ImageSpec::new(4, 4, 1, ElementType::U8)
    }

    fn read_scanline(&mut self, _row: u32, _buf: &mut [u8]) -> Result<(), ImageIoError> {
        Err(std::io::Error::other("bad sector").into())
    }

    fn close(&mut self) -> Result<(), ImageIoError> {
        Ok(())
    }
}

#[test]
fn io_failure_poisons_output_and_close_still_releases() {
    init_logs();
    let registry = Registry::with_builtins();
    let released = Arc::new(AtomicBool::new(false));
    registry.register_backend(Arc::new(FailingBackend {
        released: Arc::clone(&released),
    }));
    let dir = tempdir().unwrap();
    let file = dir.path().join("broken.fail");
    let spec = ImageSpec::new(4, 4, 1, ElementType::U8).unwrap();

    let mut out = registry.create_output(&file).unwrap();
    assert_eq!(out.format_name(), "failing");
    out.open(&file, &spec).unwrap();
    assert!(matches!(
        out.write_scanline(0, 0, &[0u8; 4]),
        Err(ImageIoError::Io(_))
    ));
    // Every later write fails the same way without reaching the backend.
    for _ in 0..2 {
        assert!(matches!(
            out.write_scanline(1, 0, &[0u8; 4]),
            Err(ImageIoError::Corrupted)
        ));
    }
    assert!(matches!(
        out.write_image(&[0u8; 16]),
        Err(ImageIoError::Corrupted)
    ));

    assert!(!released.load(Ordering::SeqCst));
    assert!(matches!(out.close(), Err(ImageIoError::CloseError(_))));
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(out.state(), SessionState::Finished);
    out.close().unwrap();
}

#[test]
fn io_failure_poisons_input() {
    init_logs();
    let registry = Registry::with_builtins();
    registry.register_backend(Arc::new(FailingBackend {
        released: Arc::new(AtomicBool::new(false)),
    }));
    let dir = tempdir().unwrap();
    let file = dir.path().join("broken.fail");
    std::fs::write(&file, b"FAIL").unwrap();

    let mut input = registry.open_input(&file).unwrap();
    assert_eq!(input.format_name(), "failing");
    let mut buf = [0u8; 4];
    assert!(matches!(
        input.read_scanline(0, 0, &mut buf),
        Err(ImageIoError::Io(_))
    ));
    assert!(matches!(
        input.read_scanline(1, 0, &mut buf),
        Err(ImageIoError::Corrupted)
    ));
    assert!(matches!(input.read_image(), Err(ImageIoError::Corrupted)));
    input.close().unwrap();
}
