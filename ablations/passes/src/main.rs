//! 精化轮数与动脉翻转的消融实验.

mod profile;
mod result;
mod runner;
mod schedules;

fn main() {
    simple_logger::init_with_level(log::Level::Warn).expect("Logger init error");
    runner::run().analyze();
}
