use super::*;
use tempfile::NamedTempFile;


async fn open() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn new_user(id: &str) -> NewUser {
    NewUser {
        id: AccountId::from(id),
        uuid: format!("uuid-{id}"),
        locale: "en-US".to_string(),
        modules: vec!["friends".to_string()],
        data: PlayerData::default(),
    }
}
