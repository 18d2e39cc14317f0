fn main() {
    if let Err(e) = graycam_lib::run() {
        eprintln!("graycam: {e}");
        std::process::exit(1);
    }
}
