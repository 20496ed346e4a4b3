fn main() -> Result<(), Box<dyn std::error::Error>> {
    ostinato::runtime::run()
}
