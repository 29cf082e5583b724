//! 程序运行函数.

use crate::result::AblationResult;
use std::thread;
use utils::loader;

/// 实际运行.
pub fn run() -> AblationResult {
    let dataset_dir = loader::dataset_dir_from_env_or_home().expect("Cannot locate dataset directory");
    assert!(dataset_dir.is_dir(), "数据集目录不存在");
    let p = dataset_dir.as_path();

    // 短路判断
    assert!(
        loader::full_run_loader(p)
            .is_ok_and(|mut l| l.next().is_some_and(|(_, r)| r.is_ok())),
        "Loading dataset error"
    );

    println!("Running ablation studies on {} cpus...", utils::cpus());
    thread::scope(|s| {
        use super::schedules::*;

        let handles = [supplied, two_passes, artery].map(|t| s.spawn(move || t(p)));

        AblationResult::from_iter(
            ["supplied", "two-pass", "artery"].into_iter().zip(
                handles
                    .into_iter()
                    .map(|th| th.join().expect("Thread joining error")),
            ),
        )
    })
}
