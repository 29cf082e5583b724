//! 流水线运行统计.

use std::time::{Duration, Instant};

/// ablation/benchmark 计时器.
///
/// 该计时器支持 "中途中断" 与 "结束中断, 继续开始计时".
#[derive(Clone, Debug)]
struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器. 初始化时会视为已经开始计时 (`self.start()`).
    #[inline]
    pub fn new() -> Self {
        Self {
            consumed: Duration::from_secs(0),
            since: Instant::now(),
        }
    }

    /// 开始计时.
    #[inline]
    pub fn start(&mut self) {
        self.since = Instant::now();
    }

    /// 结束计时, 并将这一区间的时间累加. 返回本轮计时时长.
    ///
    /// # 注意
    ///
    /// 上一次调用必须是 `self.start()`, 否则计算时间值无意义.
    #[inline]
    pub fn elapsed(&mut self) -> Duration {
        let d = self.since.elapsed();
        self.consumed += d;
        d
    }

    /// 获得总共累计下来的时间 (以毫秒为单位).
    #[inline]
    pub fn get_total_ms(&self) -> u64 {
        self.consumed.as_millis() as u64
    }
}

impl Default for AccTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// 一种精化方案在整个数据集上的统计.
#[derive(Clone, Debug)]
pub struct Profile {
    /// 成功完成的 run 个数.
    runs: u64,

    /// 加载或运行失败的 run 个数.
    failed: u64,

    /// 运行流水线花费的总时间.
    run_time: AccTimer,

    /// 整个任务花费的总时间 (包括加载数据).
    real_time: AccTimer,

    /// 最耗时的一次运行.
    most: Option<Duration>,

    /// 各 run 估计的心率 (BPM).
    heart_rates: Vec<f64>,

    /// 血管体素总数.
    vessels: u64,

    /// 动脉体素总数.
    arteries: u64,
}

impl Profile {
    /// 初始化.
    #[inline]
    pub fn new() -> Self {
        Self {
            runs: 0,
            failed: 0,
            run_time: AccTimer::default(),
            real_time: AccTimer::default(),
            most: None,
            heart_rates: Vec::new(),
            vessels: 0,
            arteries: 0,
        }
    }

    /// 开始一次运行计时.
    #[inline]
    pub fn run_start(&mut self) {
        self.run_time.start();
    }

    /// 结束一次成功运行的计时, 并记录其结果.
    pub fn run_finished(&mut self, heart_rate: f64, vessels: usize, arteries: usize) {
        let d = self.run_time.elapsed();
        self.most = Some(self.most.map_or(d, |m| m.max(d)));
        self.runs += 1;
        self.heart_rates.push(heart_rate);
        self.vessels += vessels as u64;
        self.arteries += arteries as u64;
    }

    /// 记录一次失败.
    #[inline]
    pub fn count_failed(&mut self) {
        self.failed += 1;
    }

    /// 结束全部计时.
    #[inline]
    pub fn finish(mut self) -> Self {
        self.real_time.elapsed();
        self
    }

    /// 成功 run 个数.
    #[inline]
    pub fn get_runs(&self) -> u64 {
        self.runs
    }

    /// 失败 run 个数.
    #[inline]
    pub fn get_failed(&self) -> u64 {
        self.failed
    }

    /// 以毫秒为单位获得运行流水线的总时间.
    #[inline]
    pub fn get_run_time_ms(&self) -> u64 {
        self.run_time.get_total_ms()
    }

    /// 以毫秒为单位获得任务的总自然时间.
    #[inline]
    pub fn get_real_time_ms(&self) -> u64 {
        self.real_time.get_total_ms()
    }

    /// 平均单次运行时间 (毫秒).
    pub fn get_avg_run_time_ms(&self) -> Option<f64> {
        match self.runs {
            0 => None,
            n => Some(self.get_run_time_ms() as f64 / n as f64),
        }
    }

    /// 平均心率 (BPM).
    pub fn get_avg_heart_rate(&self) -> Option<f64> {
        match self.heart_rates.len() {
            0 => None,
            n => Some(self.heart_rates.iter().sum::<f64>() / n as f64),
        }
    }

    /// 平均每个 run 的血管体素个数.
    pub fn get_avg_vessels(&self) -> Option<f64> {
        match self.runs {
            0 => None,
            n => Some(self.vessels as f64 / n as f64),
        }
    }

    /// 动脉占血管体素的比例.
    pub fn get_artery_fraction(&self) -> Option<f64> {
        match self.vessels {
            0 => None,
            v => Some(self.arteries as f64 / v as f64),
        }
    }

    /// 最耗时的一次运行. 不存在运行时返回 `None`.
    #[inline]
    pub fn get_most_time_consuming(&self) -> Option<Duration> {
        self.most
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile() {
        let mut p = Profile::new();
        assert_eq!(p.get_avg_heart_rate(), None);
        p.run_start();
        p.run_finished(70.0, 10, 4);
        p.run_start();
        p.run_finished(74.0, 30, 6);
        p.count_failed();
        let p = p.finish();
        assert_eq!(p.get_runs(), 2);
        assert_eq!(p.get_failed(), 1);
        assert_eq!(p.get_avg_heart_rate(), Some(72.0));
        assert_eq!(p.get_avg_vessels(), Some(20.0));
        assert_eq!(p.get_artery_fraction(), Some(0.25));
        assert!(p.get_most_time_consuming().is_some());
    }
}
