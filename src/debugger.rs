#![allow(dead_code)]

use backing_store::BackingStore;
use error::Error;
use filesystem::FileSystem;

mod backing_store;
mod collaborators;
mod error;
mod filesystem;
mod sort;
mod structs;
#[cfg(test)]
mod test_support;

fn prompt(separator: &str) -> Option<Vec<String>> {
    use std::io::Write;
    let mut line = String::new();
    print!("{separator}");
    std::io::stdout().flush().unwrap();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().split_whitespace().map(str::to_string).collect()),
        Err(_) => None,
    }
}

fn execute(cmd: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let device = BackingStore::open_read_only(args.first().unwrap_or(&"flatfs.img".to_owned()))?;
    let fs = FileSystem::from_device(device)?;
    if cmd.is_empty() {
        return Ok(());
    }
    match cmd[0].as_str() {
        "h" => println!(
            "files: {}, free bytes: {}",
            fs.list().len(),
            fs.free_bytes()
        ),
        "b" => println!("{}", fs.bitmap()),
        "l" => {
            for entry in fs.list() {
                println!(
                    "{:<32} {:>15} bytes at offset {}",
                    entry.name, entry.size_bytes, entry.start_offset
                );
            }
        }
        _ => {}
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    loop {
        let Some(cmd) = prompt(">> ") else {
            break;
        };
        if cmd.first().map(String::as_str) == Some("q") {
            break;
        }
        if let Err(e) = execute(&cmd) {
            eprintln!("{e}");
        }
    }
    Ok(())
}
