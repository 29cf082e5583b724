//! 实验结果.

use crate::profile::Profile;
use std::io::{self, Write};

/// 将 `profile` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, p: &Profile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.3}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Profile `{name}`:")?;
    writeln!(w, "{S4}Finished runs: {}", p.get_runs())?;
    writeln!(w, "{S4}Failed runs: {}", p.get_failed())?;
    writeln!(w, "{S4}Pipeline total time: {} ms", p.get_run_time_ms())?;
    writeln!(
        w,
        "{S4}Pipeline average time: {} ms",
        f64_to_display(p.get_avg_run_time_ms())
    )?;
    writeln!(w, "{S4}Total machine time: {} ms", p.get_real_time_ms())?;
    writeln!(
        w,
        "{S4}Average heart rate: {} BPM",
        f64_to_display(p.get_avg_heart_rate())
    )?;
    writeln!(
        w,
        "{S4}Average vessel voxels: {} per run",
        f64_to_display(p.get_avg_vessels())
    )?;
    writeln!(
        w,
        "{S4}Artery fraction: {}",
        f64_to_display(p.get_artery_fraction())
    )?;
    let t = p.get_most_time_consuming().map(|d| d.as_millis() as f64);
    write!(w, "{S4}Most time-consuming run costs {} ms", f64_to_display(t))?;
    Ok(())
}

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<(&'static str, Profile)>,
}

impl AblationResult {
    pub fn from_iter<I: IntoIterator<Item = (&'static str, Profile)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (key, profile) in self.data.iter() {
            if describe_into(key, profile, &mut buf).is_ok() {
                println!("{}", String::from_utf8_lossy(&buf));
            }
            buf.clear();

            utils::sep();
        }
    }
}
