use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 审计日志保留天数
const LOG_RETENTION_DAYS: i64 = 7;

/// 单条审计记录（JSON Lines）
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    ts: String,
    op: &'a str,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
    ok: bool,
}

struct LogFileState {
    writer: Option<BufWriter<File>>,
    current_date: Option<NaiveDate>,
}

/// 文件变更操作的审计日志
///
/// 按日期写入 `<dir>/YYYY-MM-DD.log`，每行一条 JSON。
/// 写入失败只会丢失该条记录，不影响请求本身。
pub struct AuditLog {
    log_dir: PathBuf,
    state: Mutex<LogFileState>,
}

impl AuditLog {
    pub fn new(log_dir: PathBuf) -> Self {
        let _ = fs::create_dir_all(&log_dir);
        Self {
            log_dir,
            state: Mutex::new(LogFileState {
                writer: None,
                current_date: None,
            }),
        }
    }

    /// 默认目录：`~/.filedeck/logs`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".filedeck").join("logs"))
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn record(&self, op: &str, path: &str, detail: Option<&str>, ok: bool) {
        let record = AuditRecord {
            ts: Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string(),
            op,
            path,
            detail,
            ok,
        };

        let today = Local::now().date_naive();
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };

        // 日期切换时重新打开文件
        if state.current_date != Some(today) {
            state.writer = None;
            state.current_date = None;
            if let Some(w) = self.open_log_file(today) {
                state.writer = Some(w);
                state.current_date = Some(today);
            }
        }

        if let Some(ref mut writer) = state.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
    }

    /// 清理超过保留天数的日志文件
    pub fn cleanup_old_logs(&self) {
        let cutoff = Local::now().date_naive() - chrono::Duration::days(LOG_RETENTION_DAYS);
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                    if date < cutoff {
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
    }

    fn open_log_file(&self, date: NaiveDate) -> Option<BufWriter<File>> {
        let filename = format!("{}.log", date.format("%Y-%m-%d"));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_dir.join(filename))
            .ok()
            .map(BufWriter::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_one_json_line_per_record() {
        let temp = TempDir::new().unwrap();
        let log = AuditLog::new(temp.path().join("logs"));

        log.record("delete", "/tmp/a.txt", None, true);
        log.record("rename", "/tmp/b.txt", Some("c.txt"), false);

        let today = format!("{}.log", Local::now().date_naive().format("%Y-%m-%d"));
        let content = fs::read_to_string(log.log_dir().join(today)).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["op"], "delete");
        assert_eq!(lines[0]["ok"], true);
        assert!(lines[0].get("detail").is_none());
        assert_eq!(lines[1]["detail"], "c.txt");
    }

    #[test]
    fn cleanup_removes_only_expired_logs() {
        let temp = TempDir::new().unwrap();
        let log = AuditLog::new(temp.path().to_path_buf());

        let old = temp.path().join("2000-01-01.log");
        let keep = temp.path().join("notes.txt");
        fs::write(&old, "{}").unwrap();
        fs::write(&keep, "x").unwrap();

        log.cleanup_old_logs();

        assert!(!old.exists());
        assert!(keep.exists());
    }
}
