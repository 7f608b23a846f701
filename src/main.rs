fn main() {
    if let Err(err) = crm_import::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
