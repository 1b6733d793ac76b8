fn main() -> Result<(), anyhow::Error> {
    qpipe::run()
}
