fn main() {
    if let Err(err) = data_import::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
