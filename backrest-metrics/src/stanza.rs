//! Stanza, repository and WAL archive status gauges.

use crate::normalize::ABSENT_MARKER;
use crate::record::StanzaInfo;
use crate::sink::{Emitter, Metric};

pub(crate) fn project_status(stanza: &StanzaInfo, emitter: &mut Emitter<'_>) {
    let name = stanza.name.as_str();
    emitter.emit(Metric::StanzaStatus, stanza.status.code as f64, &[name]);

    let lock = stanza.status.lock.as_ref().and_then(|l| l.backup.as_ref());
    let held = lock.is_some_and(|l| l.held);
    emitter.emit(Metric::StanzaLockStatus, if held { 1.0 } else { 0.0 }, &[name]);

    // Progress is only reported while a backup holds the lock.
    if let Some((complete, total)) = lock.and_then(|l| l.size_complete.zip(l.size)) {
        emitter.emit(Metric::StanzaBackupComplete, complete as f64, &[name]);
        emitter.emit(Metric::StanzaBackupTotal, total as f64, &[name]);
    }
}

pub(crate) fn project_repos(stanza: &StanzaInfo, emitter: &mut Emitter<'_>) {
    let Some(repos) = &stanza.repo else {
        return;
    };
    for repo in repos {
        let repo_key = repo.key.to_string();
        emitter.emit(
            Metric::RepoStatus,
            repo.status.code as f64,
            &[&repo.cipher, &repo_key, &stanza.name],
        );
    }
}

pub(crate) fn project_archives(stanza: &StanzaInfo, emitter: &mut Emitter<'_>) {
    for archive in &stanza.archive {
        let database_id = archive.database.id.to_string();
        let repo_key_value = archive.database.repo_key_or_default();
        let repo_key = repo_key_value.to_string();
        let pg_version = stanza
            .pg_version(archive.database.id, repo_key_value)
            .unwrap_or(ABSENT_MARKER);
        let wal_max = archive.max.as_deref().unwrap_or(ABSENT_MARKER);
        let wal_min = archive.min.as_deref().unwrap_or(ABSENT_MARKER);
        emitter.emit(
            Metric::WalArchiveStatus,
            1.0,
            &[&database_id, pg_version, &repo_key, &stanza.name, wal_max, wal_min],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::parse_info;
    use crate::sink::RecordingSink;

    const STANZA: &str = r#"[{
        "archive": [
            {"database": {"id": 1, "repo-key": 1}, "id": "13-1",
             "max": "000000010000000000000010", "min": "000000010000000000000001"},
            {"database": {"id": 1, "repo-key": 2}, "id": "13-1", "max": null, "min": null}
        ],
        "cipher": "mixed",
        "db": [{"id": 1, "repo-key": 1, "system-id": 6970977677138971135, "version": "13"}],
        "name": "demo",
        "repo": [
            {"cipher": "none", "key": 1, "status": {"code": 0, "message": "ok"}},
            {"cipher": "aes-256-cbc", "key": 2, "status": {"code": 1, "message": "missing stanza path"}}
        ],
        "status": {
            "code": 0,
            "lock": {"backup": {"held": true, "size": 24316343, "size-cplt": 1024}},
            "message": "ok"
        }
    }]"#;

    fn stanza() -> StanzaInfo {
        parse_info(STANZA.as_bytes()).unwrap().remove(0)
    }

    #[test]
    fn test_status_and_lock_progress() {
        let sink = RecordingSink::new();
        let mut emitter = Emitter::new(&sink);
        project_status(&stanza(), &mut emitter);

        assert_eq!(sink.of(Metric::StanzaStatus)[0].value, 0.0);
        assert_eq!(sink.of(Metric::StanzaLockStatus)[0].value, 1.0);
        assert_eq!(sink.of(Metric::StanzaBackupComplete)[0].value, 1024.0);
        assert_eq!(sink.of(Metric::StanzaBackupTotal)[0].value, 24316343.0);
    }

    #[test]
    fn test_no_progress_without_lock() {
        let mut info = stanza();
        info.status.lock = None;
        let sink = RecordingSink::new();
        let mut emitter = Emitter::new(&sink);
        project_status(&info, &mut emitter);

        assert_eq!(sink.of(Metric::StanzaLockStatus)[0].value, 0.0);
        assert!(sink.of(Metric::StanzaBackupComplete).is_empty());
    }

    #[test]
    fn test_repo_status_per_repo() {
        let sink = RecordingSink::new();
        let mut emitter = Emitter::new(&sink);
        project_repos(&stanza(), &mut emitter);

        let repo2 = sink.find(Metric::RepoStatus, "repo_key", "2").unwrap();
        assert_eq!(repo2.value, 1.0);
        assert_eq!(repo2.label("cipher"), Some("aes-256-cbc"));
        assert_eq!(sink.of(Metric::RepoStatus).len(), 2);
    }

    #[test]
    fn test_archive_status_labels() {
        let sink = RecordingSink::new();
        let mut emitter = Emitter::new(&sink);
        project_archives(&stanza(), &mut emitter);

        let repo1 = sink.find(Metric::WalArchiveStatus, "repo_key", "1").unwrap();
        assert_eq!(repo1.label("wal_min"), Some("000000010000000000000001"));
        assert_eq!(repo1.label("pg_version"), Some("13"));

        let repo2 = sink.find(Metric::WalArchiveStatus, "repo_key", "2").unwrap();
        assert_eq!(repo2.label("wal_max"), Some("-"));
        assert_eq!(repo2.label("pg_version"), Some("13"));
    }
}
