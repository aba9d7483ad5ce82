use std::env;
use std::process;

use finnigan::RawFileReader;

pub fn main() {
    let mut args = env::args().skip(1);
    let path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("usage: finnigan-dump <file.RAW> [scan number]");
            process::exit(2);
        }
    };
    let mut reader = match RawFileReader::open(&path) {
        Ok(reader) => reader,
        Err(e) => {
            eprintln!("{path}: {e}");
            process::exit(1);
        }
    };

    let inst = reader.instrument().clone();
    println!(
        "{path}: schema version {}, {} scans [{}-{}]",
        reader.version(),
        reader.len(),
        reader.first_scan(),
        reader.last_scan()
    );
    println!(
        "instrument: {} ({}), s/n {}, software {}",
        inst.model, inst.name, inst.serial_number, inst.software_version
    );
    for entry in reader.error_log() {
        println!("error log: {:.4} min: {}", entry.time, entry.message);
    }

    if let Some(target) = args.next() {
        match target.parse::<u32>() {
            Ok(number) => reader.describe(number),
            Err(_) => {
                eprintln!("not a scan number: {target}");
                process::exit(2);
            }
        }
    }
}
