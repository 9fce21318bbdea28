#![allow(dead_code)]

use std::io::Write;

use collaborators::{RandomSource, SystemRandom};
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

const DEFAULT_IMAGE_PATH: &str = "flatfs.img";

fn prompt(separator: &str) -> Option<Vec<String>> {
    let mut line = String::new();
    print!("{separator}");
    std::io::stdout().flush().ok()?;
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().split_whitespace().map(str::to_string).collect()),
        Err(_) => None,
    }
}

fn print_help() {
    println!("commands:");
    println!("  create <name> <count>          create <name> holding <count> random integers");
    println!("  delete <name>                  delete a file");
    println!("  list                           list all files");
    println!("  read <name> <start> <end>      print integers [start, end] inclusive");
    println!("  concatenate <name1> <name2>    append name2's contents to name1");
    println!("  sort <name>                    sort a file's integers in place");
    println!("  help                           show this message");
    println!("  quit                           exit");
}

fn execute(
    fs: &mut FileSystem<backing_store::BackingStore>,
    random: &mut impl RandomSource,
    cmd: &[String],
) -> Result<(), Error> {
    match cmd {
        [] => Ok(()),
        [verb, name, count] if verb == "create" => {
            let count: usize = count.parse().map_err(|_| Error::InvalidName)?;
            fs.create(name, count, random)?;
            println!("created '{name}' with {count} integers");
            Ok(())
        }
        [verb, name] if verb == "delete" => {
            fs.delete(name)?;
            println!("deleted '{name}'");
            Ok(())
        }
        [verb] if verb == "list" => {
            println!("{:<32} {:>15}", "name", "size (bytes)");
            for entry in fs.list() {
                println!("{:<32} {:>15}", entry.name, entry.size_bytes);
            }
            println!("files: {}, free bytes: {}", fs.list().len(), fs.free_bytes());
            Ok(())
        }
        [verb, name, start, end] if verb == "read" => {
            let start: usize = start.parse().map_err(|_| Error::OutOfRange)?;
            let end: usize = end.parse().map_err(|_| Error::OutOfRange)?;
            let data = fs.read(name)?;
            let num_ints = data.len() / 4;
            if start > end || end >= num_ints {
                return Err(Error::OutOfRange);
            }
            let values: Vec<i32> = data[start * 4..(end + 1) * 4]
                .chunks_exact(4)
                .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
                .collect();
            println!("{values:?}");
            Ok(())
        }
        [verb, name1, name2] if verb == "concatenate" => {
            fs.concatenate(name1, name2)?;
            println!("concatenated '{name2}' onto '{name1}'");
            Ok(())
        }
        [verb, name] if verb == "sort" => {
            sort::sort(fs, name)?;
            println!("sorted '{name}'");
            Ok(())
        }
        [verb] if verb == "help" => {
            print_help();
            Ok(())
        }
        [verb, ..] => {
            println!("unknown command '{verb}', try 'help'");
            Ok(())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_IMAGE_PATH.to_string());
    let mut fs = FileSystem::open(&path)?;
    let mut random = SystemRandom;

    println!("flatfs ({path})");
    print_help();
    loop {
        let Some(cmd) = prompt("> ") else {
            break;
        };
        if cmd.first().map(String::as_str) == Some("quit") {
            break;
        }
        if let Err(e) = execute(&mut fs, &mut random, &cmd) {
            eprintln!("error: {e}");
        }
    }
    Ok(())
}
