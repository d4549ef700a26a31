use criterion::{black_box, criterion_group, criterion_main, Criterion};
use remote_mem::pe::{parse_exports, parse_exports_at, FileImage};
use remote_mem::{Address, BufferMemory, ProtectionFlags};

const EXPORTS: usize = 500;
const DIRECTORY_RVA: usize = 0x1000;
const IMAGE_SIZE: usize = 0x10000;

fn put(image: &mut [u8], at: usize, bytes: &[u8]) {
    image[at..at + bytes.len()].copy_from_slice(bytes);
}

/// PE32+ image with one section holding `EXPORTS` named exports
fn image_with_exports() -> Vec<u8> {
    let mut image = vec![0u8; IMAGE_SIZE];
    put(&mut image, 0, b"MZ");
    put(&mut image, 0x3C, &0x80u32.to_le_bytes());
    put(&mut image, 0x80, b"PE\0\0");
    put(&mut image, 0x84, &0x8664u16.to_le_bytes());
    put(&mut image, 0x86, &1u16.to_le_bytes());
    put(&mut image, 0x94, &240u16.to_le_bytes());

    let opt = 0x98;
    put(&mut image, opt, &0x020Bu16.to_le_bytes());
    put(&mut image, opt + 56, &(IMAGE_SIZE as u32).to_le_bytes());
    put(&mut image, opt + 60, &(DIRECTORY_RVA as u32).to_le_bytes());
    put(&mut image, opt + 108, &16u32.to_le_bytes());

    let section = opt + 240;
    put(&mut image, section, b".rdata");
    let raw = (IMAGE_SIZE - DIRECTORY_RVA) as u32;
    put(&mut image, section + 8, &raw.to_le_bytes());
    put(&mut image, section + 12, &(DIRECTORY_RVA as u32).to_le_bytes());
    put(&mut image, section + 16, &raw.to_le_bytes());
    put(&mut image, section + 20, &(DIRECTORY_RVA as u32).to_le_bytes());

    let functions = DIRECTORY_RVA + 40;
    let names = functions + EXPORTS * 4;
    let ordinals = names + EXPORTS * 4;
    let mut strings = ordinals + EXPORTS * 2;
    for index in 0..EXPORTS {
        put(&mut image, functions + index * 4, &(0x8000u32 + index as u32 * 16).to_le_bytes());
        put(&mut image, names + index * 4, &(strings as u32).to_le_bytes());
        put(&mut image, ordinals + index * 2, &(index as u16).to_le_bytes());
        let name = format!("Function{:04}\0", index);
        put(&mut image, strings, name.as_bytes());
        strings += name.len();
    }

    let directory_size = (strings - DIRECTORY_RVA) as u32;
    put(&mut image, opt + 112, &(DIRECTORY_RVA as u32).to_le_bytes());
    put(&mut image, opt + 116, &directory_size.to_le_bytes());
    put(&mut image, DIRECTORY_RVA + 16, &1u32.to_le_bytes());
    put(&mut image, DIRECTORY_RVA + 20, &(EXPORTS as u32).to_le_bytes());
    put(&mut image, DIRECTORY_RVA + 24, &(EXPORTS as u32).to_le_bytes());
    put(&mut image, DIRECTORY_RVA + 28, &(functions as u32).to_le_bytes());
    put(&mut image, DIRECTORY_RVA + 32, &(names as u32).to_le_bytes());
    put(&mut image, DIRECTORY_RVA + 36, &(ordinals as u32).to_le_bytes());
    image
}

fn benchmark_exports(c: &mut Criterion) {
    let image = image_with_exports();

    let memory = BufferMemory::new();
    let base = Address::new(0x6000_0000);
    memory.map(base, &image, ProtectionFlags::read_only()).unwrap();
    c.bench_function("exports_in_memory", |b| {
        b.iter(|| parse_exports_at(&memory, black_box(base), "bench.dll").unwrap());
    });

    // Headers end where the section starts, so the file layout equals the mapped one
    let file = FileImage::from_bytes("bench.dll", image).unwrap();
    c.bench_function("exports_from_file", |b| {
        b.iter(|| parse_exports(black_box(&file), "bench.dll").unwrap());
    });

    let exports = parse_exports(&file, "bench.dll").unwrap();
    c.bench_function("find_by_name", |b| {
        b.iter(|| exports.find_by_name(black_box("Function0499")).is_some());
    });
}

criterion_group!(benches, benchmark_exports);
criterion_main!(benches);
