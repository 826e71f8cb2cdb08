fn main() -> std::process::ExitCode {
    modelget_lib::run()
}
