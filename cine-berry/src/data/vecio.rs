//! 纯文本数值向量的读写.
//!
//! 文件中的数值以空白字符 (空格, 制表符, 换行) 分隔. 多列文件按行读入, 每行一条记录.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::{PipelineError, PipelineResult};

fn parse_token(token: &str, path: &Path, line: usize) -> PipelineResult<f64> {
    token.parse::<f64>().map_err(|_| {
        PipelineError::config(format!(
            "{}:{}: cannot parse `{}` as a number",
            path.display(),
            line + 1,
            token
        ))
    })
}

/// 打开文本文件. 以 `.gz` 结尾时透明解压.
fn open_text(path: &Path) -> PipelineResult<Box<dyn BufRead>> {
    let file = fs::File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// 读入所有数值, 忽略行结构.
pub fn read_vec<P: AsRef<Path>>(path: P) -> PipelineResult<Vec<f64>> {
    let path = path.as_ref();
    let mut out = Vec::new();
    for (i, line) in open_text(path)?.lines().enumerate() {
        for token in line?.split_whitespace() {
            out.push(parse_token(token, path, i)?);
        }
    }
    Ok(out)
}

/// 读入第 `col` 列. 空行被跳过, 以 `#` 开头的行视为注释.
pub fn read_column<P: AsRef<Path>>(path: P, col: usize) -> PipelineResult<Vec<f64>> {
    let path = path.as_ref();
    let mut out = Vec::new();
    for (i, line) in open_text(path)?.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let token = trimmed.split_whitespace().nth(col).ok_or_else(|| {
            PipelineError::config(format!(
                "{}:{}: no column {}",
                path.display(),
                i + 1,
                col
            ))
        })?;
        out.push(parse_token(token, path, i)?);
    }
    Ok(out)
}

/// 每行写入一个数值.
pub fn write_vec<P: AsRef<Path>>(path: P, data: &[f64]) -> PipelineResult<()> {
    let mut file = std::io::BufWriter::new(fs::File::create(path.as_ref())?);
    for v in data {
        writeln!(file, "{v}")?;
    }
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("cine-berry-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_write_then_read() {
        let path = temp_file("vec.txt");
        write_vec(&path, &[1.5, -2.0, 3.25]).unwrap();
        assert_eq!(read_vec(&path).unwrap(), vec![1.5, -2.0, 3.25]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_column() {
        let path = temp_file("cols.txt");
        fs::write(&path, "# t pleth\n0.0 10\n0.1 11\n\n0.2 12\n").unwrap();
        assert_eq!(read_column(&path, 1).unwrap(), vec![10.0, 11.0, 12.0]);
        assert!(read_column(&path, 2).is_err());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_number() {
        let path = temp_file("bad.txt");
        fs::write(&path, "1.0\nabc\n").unwrap();
        assert!(matches!(read_vec(&path), Err(PipelineError::Configuration(_))));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_gz() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let path = temp_file("vec.txt.gz");
        let mut enc = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"4\n5\n6\n").unwrap();
        enc.finish().unwrap();
        assert_eq!(read_vec(&path).unwrap(), vec![4.0, 5.0, 6.0]);
        fs::remove_file(&path).unwrap();
    }
}
