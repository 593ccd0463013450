fn main() {
    std::process::exit(s2::run::run());
}
