//! Append-only log (C11, §4.6): every mutation mirrored as a valid
//! multi-bulk command, replayable through the same parser the network
//! protocol uses.

use std::io::{self, Write};

use crate::config::AppendFsync;
use crate::db::unix_now;
use crate::protocol::encode_multibulk_command;

/// Rewrites `EXPIRE`/`PEXPIRE`-shaped commands to `EXPIREAT` with an
/// absolute deadline so replay after a pause still lands on the right
/// instant (§4.6 "EXPIRE is rewritten as EXPIREAT").
pub fn rewrite_expire_to_absolute(argv: &[Vec<u8>], now: i64) -> Option<Vec<Vec<u8>>> {
    if argv.len() != 3 {
        return None;
    }
    let name = String::from_utf8_lossy(&argv[0]).to_ascii_uppercase();
    let secs: i64 = std::str::from_utf8(&argv[2]).ok()?.parse().ok()?;
    match name.as_str() {
        "EXPIRE" => Some(vec![b"EXPIREAT".to_vec(), argv[1].clone(), (now + secs).to_string().into_bytes()]),
        "PEXPIRE" => Some(vec![
            b"PEXPIREAT".to_vec(),
            argv[1].clone(),
            (now * 1000 + secs).to_string().into_bytes(),
        ]),
        _ => None,
    }
}

/// Appends one mutation to the log, preceding it with a `SELECT` if the
/// target db differs from the log's last-written db (§4.6 "On a DB switch,
/// emit SELECT before the mutation").
pub struct AppendLog {
    file: std::fs::File,
    path: std::path::PathBuf,
    pub last_written_db: Option<usize>,
    pub fsync_policy: AppendFsync,
    last_fsync: i64,
}

impl AppendLog {
    pub fn open(path: &std::path::Path, fsync_policy: AppendFsync) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            last_written_db: None,
            fsync_policy,
            last_fsync: unix_now(),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Re-opens the log file after `BGREWRITEAOF` has atomically replaced it
    /// on disk — the append-mode handle opened against the old inode would
    /// otherwise keep writing to the now-unlinked file.
    pub fn reset_after_rewrite(&mut self) -> io::Result<()> {
        self.file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.last_written_db = None;
        Ok(())
    }

    pub fn append(&mut self, db_index: usize, argv: &[Vec<u8>]) -> io::Result<()> {
        if self.last_written_db != Some(db_index) {
            let select = encode_multibulk_command(&[b"SELECT".to_vec(), db_index.to_string().into_bytes()]);
            self.file.write_all(&select)?;
            self.last_written_db = Some(db_index);
        }
        let encoded = encode_multibulk_command(argv);
        self.file.write_all(&encoded)?;
        if self.fsync_policy == AppendFsync::Always {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Called from the cron: the per-second fsync policy remembers the
    /// last fsync timestamp and only syncs once a new second has begun.
    pub fn cron_fsync_tick(&mut self, now: i64) -> io::Result<()> {
        if self.fsync_policy == AppendFsync::EverySecond && now > self.last_fsync {
            self.file.sync_data()?;
            self.last_fsync = now;
        }
        Ok(())
    }
}

/// Emits the minimal command sequence that rebuilds `store` from scratch,
/// used both by the full AOL rewrite and by `BGREWRITEAOF` (§4.6
/// "Rewrite").
pub fn rewrite_commands(store: &crate::db::Store) -> Vec<Vec<Vec<u8>>> {
    let mut commands = Vec::new();
    let now = unix_now();
    for (db_index, db) in store.databases.iter().enumerate() {
        if db.dict.is_empty() {
            continue;
        }
        commands.push(vec![b"SELECT".to_vec(), db_index.to_string().into_bytes()]);
        for (key, value) in db.dict.iter() {
            match value {
                crate::value::Value::Str(s) => {
                    commands.push(vec![b"SET".to_vec(), key.clone(), s.as_bytes()]);
                }
                crate::value::Value::List(list) => {
                    for item in list.iter() {
                        commands.push(vec![b"RPUSH".to_vec(), key.clone(), item.clone()]);
                    }
                }
                crate::value::Value::Set(set) => {
                    for (member, _) in set.iter() {
                        commands.push(vec![b"SADD".to_vec(), key.clone(), member.clone()]);
                    }
                }
                crate::value::Value::ZSet(zset) => {
                    for (member, score) in zset.iter_ascending() {
                        commands.push(vec![b"ZADD".to_vec(), key.clone(), score.to_string().into_bytes(), member.clone()]);
                    }
                }
                crate::value::Value::Hash(hash) => {
                    for (field, val) in hash.iter() {
                        commands.push(vec![b"HSET".to_vec(), key.clone(), field, val]);
                    }
                }
            }
            if let Some(&expiry) = db.expires.get(key.as_slice()) {
                commands.push(vec![b"EXPIREAT".to_vec(), key.clone(), expiry.to_string().into_bytes()]);
            }
        }
    }
    let _ = now;
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::value::{StrValue, Value};
    use tempfile::tempdir;

    #[test]
    fn expire_rewrites_to_absolute_expireat() {
        let argv = vec![b"EXPIRE".to_vec(), b"k".to_vec(), b"10".to_vec()];
        let rewritten = rewrite_expire_to_absolute(&argv, 1000).unwrap();
        assert_eq!(rewritten[0], b"EXPIREAT");
        assert_eq!(rewritten[2], b"1010");
    }

    #[test]
    fn append_emits_select_once_per_db_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aol");
        let mut log = AppendLog::open(&path, AppendFsync::Always).unwrap();
        log.append(0, &[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]).unwrap();
        log.append(0, &[b"SET".to_vec(), b"b".to_vec(), b"2".to_vec()]).unwrap();
        log.append(1, &[b"SET".to_vec(), b"c".to_vec(), b"3".to_vec()]).unwrap();
        let contents = std::fs::read(&path).unwrap();
        let select_count = contents.windows(b"SELECT".len()).filter(|w| *w == b"SELECT").count();
        assert_eq!(select_count, 2);
    }

    #[test]
    fn reset_after_rewrite_follows_the_file_to_its_new_inode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aol");
        let mut log = AppendLog::open(&path, AppendFsync::Always).unwrap();
        log.append(0, &[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]).unwrap();

        // Simulate BGREWRITEAOF: a fresh file replaces the old one at `path`
        // out from under the already-open append-mode handle.
        let rewritten_path = dir.path().join("test.aol.tmp");
        std::fs::write(&rewritten_path, b"").unwrap();
        std::fs::rename(&rewritten_path, &path).unwrap();

        log.reset_after_rewrite().unwrap();
        assert_eq!(log.last_written_db, None);

        log.append(0, &[b"SET".to_vec(), b"b".to_vec(), b"2".to_vec()]).unwrap();
        let contents = std::fs::read(&path).unwrap();
        assert!(contents.windows(b"SET".len()).any(|w| w == b"SET"));
        // The old handle's writes never landed anywhere reachable through
        // `path` once the rename happened, so only the post-reset append
        // (plus its leading SELECT) should be present.
        let select_count = contents.windows(b"SELECT".len()).filter(|w| *w == b"SELECT").count();
        assert_eq!(select_count, 1);
    }

    #[test]
    fn rewrite_produces_replayable_minimal_sequence() {
        let mut store = Store::new(1);
        store.databases[0].set(b"k".to_vec(), Value::Str(StrValue::from_bytes(b"v".to_vec())));
        let commands = rewrite_commands(&store);
        assert!(commands.iter().any(|c| c[0] == b"SELECT"));
        assert!(commands.iter().any(|c| c[0] == b"SET" && c[1] == b"k"));
    }
}
