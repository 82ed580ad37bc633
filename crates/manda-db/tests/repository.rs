use manda_db::{InstanceStatus, InstanceUpdate, MandaDb, NewMessage};

async fn setup() -> (MandaDb, String) {
    let db = MandaDb::in_memory().await.unwrap();
    let user = db.create_user("owner@example.com", Some("Owner")).await.unwrap();
    (db, user.id)
}

fn message(instance_id: &str, contact_id: i64, message_id: &str, timestamp: i64) -> NewMessage {
    NewMessage {
        message_id: message_id.into(),
        from_me: false,
        text: Some(format!("body of {message_id}")),
        message_type: "text".into(),
        timestamp,
        status: Some("received".into()),
        contact_id,
        instance_id: instance_id.into(),
    }
}

#[tokio::test]
async fn new_instance_starts_disconnected() {
    let (db, user_id) = setup().await;

    let instance = db.create_instance(&user_id, "Sales").await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Disconnected);
    assert_eq!(instance.user_id, user_id);
    assert!(instance.phone_number.is_none());

    let fetched = db.get_instance(&instance.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "Sales");
}

#[tokio::test]
async fn partial_update_touches_only_given_fields() {
    let (db, user_id) = setup().await;
    let instance = db.create_instance(&user_id, "Support").await.unwrap();

    db.update_instance(
        &instance.id,
        InstanceUpdate::status(InstanceStatus::Connecting).with_qr_code(Some("data:qr".into())),
    )
    .await
    .unwrap();

    db.update_instance(
        &instance.id,
        InstanceUpdate::default().with_phone_number(Some("5511999999999".into())),
    )
    .await
    .unwrap();

    let fetched = db.get_instance(&instance.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, InstanceStatus::Connecting);
    assert_eq!(fetched.qr_code.as_deref(), Some("data:qr"));
    assert_eq!(fetched.phone_number.as_deref(), Some("5511999999999"));

    db.update_instance(&instance.id, InstanceUpdate::default().with_qr_code(None))
        .await
        .unwrap();
    let fetched = db.get_instance(&instance.id).await.unwrap().unwrap();
    assert!(fetched.qr_code.is_none());
    assert_eq!(fetched.status, InstanceStatus::Connecting);
}

#[tokio::test]
async fn updating_unknown_instance_fails() {
    let (db, _) = setup().await;
    let err = db
        .update_instance("missing", InstanceUpdate::status(InstanceStatus::Connected))
        .await
        .unwrap_err();
    assert!(matches!(err, manda_db::DbError::InstanceNotFound(_)));
}

#[tokio::test]
async fn connected_phone_lookup_excludes_self_and_other_statuses() {
    let (db, user_id) = setup().await;
    let a = db.create_instance(&user_id, "A").await.unwrap();
    let b = db.create_instance(&user_id, "B").await.unwrap();

    db.update_instance(
        &a.id,
        InstanceUpdate::status(InstanceStatus::Connected)
            .with_phone_number(Some("5511999999999".into())),
    )
    .await
    .unwrap();

    let hit = db.find_connected_by_phone("5511999999999", &b.id).await.unwrap();
    assert_eq!(hit.map(|i| i.id), Some(a.id.clone()));

    assert!(db.find_connected_by_phone("5511999999999", &a.id).await.unwrap().is_none());

    db.update_instance(&a.id, InstanceUpdate::status(InstanceStatus::Disconnected))
        .await
        .unwrap();
    assert!(db.find_connected_by_phone("5511999999999", &b.id).await.unwrap().is_none());
}

#[tokio::test]
async fn list_by_status_filters() {
    let (db, user_id) = setup().await;
    let a = db.create_instance(&user_id, "A").await.unwrap();
    let b = db.create_instance(&user_id, "B").await.unwrap();
    let _c = db.create_instance(&user_id, "C").await.unwrap();

    db.update_instance(&a.id, InstanceUpdate::status(InstanceStatus::Connected))
        .await
        .unwrap();
    db.update_instance(&b.id, InstanceUpdate::status(InstanceStatus::Connecting))
        .await
        .unwrap();

    let restorable = db
        .list_instances_by_status(&[InstanceStatus::Connected, InstanceStatus::Connecting])
        .await
        .unwrap();
    let mut ids: Vec<_> = restorable.into_iter().map(|i| i.id).collect();
    ids.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(ids, expected);

    assert!(db.list_instances_by_status(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn contact_upsert_keeps_known_values() {
    let (db, user_id) = setup().await;
    let instance = db.create_instance(&user_id, "A").await.unwrap();
    let jid = "5511988887777@s.whatsapp.net";

    let created = db
        .upsert_contact(&instance.id, jid, Some("Ana"), "5511988887777", Some("https://pic"))
        .await
        .unwrap();
    assert_eq!(created.name.as_deref(), Some("Ana"));

    let updated = db
        .upsert_contact(&instance.id, jid, None, "5511988887777", None)
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.name.as_deref(), Some("Ana"));
    assert_eq!(updated.profile_pic.as_deref(), Some("https://pic"));

    let renamed = db
        .upsert_contact(&instance.id, jid, Some("Ana Maria"), "5511988887777", None)
        .await
        .unwrap();
    assert_eq!(renamed.name.as_deref(), Some("Ana Maria"));
}

#[tokio::test]
async fn contacts_are_scoped_per_instance() {
    let (db, user_id) = setup().await;
    let a = db.create_instance(&user_id, "A").await.unwrap();
    let b = db.create_instance(&user_id, "B").await.unwrap();
    let jid = "5511988887777@s.whatsapp.net";

    let in_a = db.create_contact(&a.id, jid, "5511988887777", None).await.unwrap();
    let in_b = db.create_contact(&b.id, jid, "5511988887777", None).await.unwrap();
    assert_ne!(in_a.id, in_b.id);

    let again = db.create_contact(&a.id, jid, "5511988887777", None).await.unwrap();
    assert_eq!(again.id, in_a.id);

    assert_eq!(db.get_contacts(&a.id).await.unwrap().len(), 1);
    assert!(db.get_contact_by_jid(&b.id, jid).await.unwrap().is_some());
}

#[tokio::test]
async fn messages_dedupe_and_page_in_timestamp_order() {
    let (db, user_id) = setup().await;
    let instance = db.create_instance(&user_id, "A").await.unwrap();
    let contact = db
        .create_contact(&instance.id, "5511@s.whatsapp.net", "5511", None)
        .await
        .unwrap();

    assert!(db.insert_message(&message(&instance.id, contact.id, "m3", 300)).await.unwrap());
    assert!(db.insert_message(&message(&instance.id, contact.id, "m1", 100)).await.unwrap());
    assert!(db.insert_message(&message(&instance.id, contact.id, "m2", 200)).await.unwrap());
    assert!(!db.insert_message(&message(&instance.id, contact.id, "m1", 100)).await.unwrap());

    let first = db.get_messages(&instance.id, 1, 2).await.unwrap();
    let ids: Vec<_> = first.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2"]);

    let second = db.get_messages(&instance.id, 2, 2).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, "m3");

    let overview = db.list_instances(&user_id).await.unwrap();
    assert_eq!(overview.len(), 1);
    assert_eq!(overview[0].message_count, 3);
    assert_eq!(overview[0].contact_count, 1);
}

#[tokio::test]
async fn credential_records_upsert_delete_and_stats() {
    let (db, user_id) = setup().await;
    let instance = db.create_instance(&user_id, "A").await.unwrap();

    let empty = db.credential_stats(&instance.id, "creds").await.unwrap();
    assert_eq!(empty.total_keys, 0);
    assert!(!empty.has_credentials);
    assert!(empty.last_updated.is_none());

    db.put_credential(&instance.id, "pre-key-1", "{\"a\":1}").await.unwrap();
    db.put_credential(&instance.id, "pre-key-1", "{\"a\":2}").await.unwrap();
    let record = db.get_credential(&instance.id, "pre-key-1").await.unwrap().unwrap();
    assert_eq!(record.key_data, "{\"a\":2}");

    let stats = db.credential_stats(&instance.id, "creds").await.unwrap();
    assert_eq!(stats.total_keys, 1);
    assert!(!stats.has_credentials);
    assert!(stats.last_updated.is_some());

    db.put_credential(&instance.id, "creds", "{}").await.unwrap();
    assert!(db.credential_stats(&instance.id, "creds").await.unwrap().has_credentials);

    assert!(db.delete_credential(&instance.id, "pre-key-1").await.unwrap());
    assert!(!db.delete_credential(&instance.id, "pre-key-1").await.unwrap());

    assert_eq!(db.clear_credentials(&instance.id).await.unwrap(), 1);
    assert!(db.list_credentials(&instance.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_instance_cascades() {
    let (db, user_id) = setup().await;
    let instance = db.create_instance(&user_id, "A").await.unwrap();
    db.put_credential(&instance.id, "creds", "{}").await.unwrap();
    db.create_contact(&instance.id, "5511@s.whatsapp.net", "5511", None)
        .await
        .unwrap();

    assert!(db.delete_instance(&instance.id).await.unwrap());
    assert!(db.get_instance(&instance.id).await.unwrap().is_none());
    assert!(db.list_credentials(&instance.id).await.unwrap().is_empty());
    assert!(db.get_contacts(&instance.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn huge_page_numbers_return_nothing() {
    let (db, user_id) = setup().await;
    let instance = db.create_instance(&user_id, "A").await.unwrap();
    let contact = db
        .create_contact(&instance.id, "5511@s.whatsapp.net", "5511", None)
        .await
        .unwrap();
    db.insert_message(&message(&instance.id, contact.id, "m1", 100)).await.unwrap();

    assert!(db.get_messages(&instance.id, i64::MAX, 999).await.unwrap().is_empty());
    assert!(db.get_messages(&instance.id, i64::MAX / 10, i64::MAX).await.unwrap().is_empty());
    assert_eq!(db.get_messages(&instance.id, i64::MIN, 999).await.unwrap().len(), 1);
}

#[tokio::test]
async fn password_users_are_found_by_email() {
    let db = MandaDb::in_memory().await.unwrap();

    let user = db
        .create_user_with_password("ana@example.com", Some("Ana"), "$argon2id$stub")
        .await
        .unwrap();
    let found = db.get_user_by_email("ana@example.com").await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(found.name.as_deref(), Some("Ana"));
    assert_eq!(db.get_password_hash(&user.id).await.unwrap().as_deref(), Some("$argon2id$stub"));

    let plain = db.create_user("bia@example.com", None).await.unwrap();
    assert_eq!(db.get_password_hash(&plain.id).await.unwrap(), None);
    assert!(db.get_user_by_email("nobody@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn email_can_only_be_registered_once() {
    let db = MandaDb::in_memory().await.unwrap();
    db.create_user_with_password("ana@example.com", None, "h1").await.unwrap();

    let err = db
        .create_user_with_password("ana@example.com", None, "h2")
        .await
        .unwrap_err();
    assert!(matches!(err, manda_db::DbError::EmailTaken(email) if email == "ana@example.com"));
}
