use rsinject::elf::symbol::STT_FUNC;
use rsinject::ElfImage;

fn main() {
    let mut args = std::env::args().skip(1);

    let mut list = false;
    let mut base: Option<usize> = None;
    let mut positional: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--list" {
            list = true;
            continue;
        }
        if arg == "--base" {
            let Some(raw) = args.next() else {
                eprintln!("Error: --base expects a value");
                std::process::exit(1);
            };
            base = Some(parse_address(&raw));
            continue;
        }
        positional.push(arg);
    }

    let Some((path, names)) = positional.split_first() else {
        eprintln!("Usage: elfsym [--list] [--base <addr>] <elf> [symbol...]");
        std::process::exit(1);
    };

    let image = match ElfImage::open(path) {
        Ok(image) => image,
        Err(error) => {
            eprintln!("Error: could not open {path}: {error}");
            std::process::exit(1);
        }
    };

    println!(
        "{path}: machine={} type={} relocatable={}",
        image.machine(),
        image.elf_type(),
        image.needs_relocation()
    );

    if list {
        for table in image.symbol_tables() {
            for symbol in table.iter().filter(|s| s.is_defined() && s.symbol_type() == STT_FUNC) {
                println!(
                    "{:?} {:#018x} {:?} {}",
                    table.kind(),
                    symbol.st_value,
                    symbol.visibility(),
                    String::from_utf8_lossy(table.name_of(&symbol))
                );
            }
        }
    }

    let mut missing = 0;
    for name in names {
        match image.resolve(name) {
            Some(value) => {
                let address = match base {
                    Some(base) if image.needs_relocation() => base.wrapping_add(value),
                    _ => value,
                };
                println!("{name} = {address:#x}");
            }
            None => {
                println!("{name} not found");
                missing += 1;
            }
        }
    }

    if let Err(error) = image.close() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
    std::process::exit(if missing == 0 { 0 } else { 2 });
}

fn parse_address(raw: &str) -> usize {
    let (digits, radix) = if let Some(hex) = raw.strip_prefix("0x") {
        (hex, 16)
    } else if let Some(hex) = raw.strip_prefix("0X") {
        (hex, 16)
    } else {
        (raw, 10)
    };

    match usize::from_str_radix(digits, radix) {
        Ok(value) => value,
        Err(_) => {
            eprintln!("Error: invalid base address: {raw}");
            std::process::exit(1);
        }
    }
}
