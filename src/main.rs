fn main() {
    scr_ignore_lib::run()
}
