use std::process;

fn main() {
    if let Err(err) = labelkit::run() {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}
