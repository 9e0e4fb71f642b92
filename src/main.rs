fn main() {
    rulr::cli(rulr::Engine::default())
}
