//! End-to-end query-set execution against in-memory SQLite.
//!
//! Each test opens its own database, so tests never share rows. Hook tests
//! filter events by a table no other test writes to, because the hook
//! registry is process-wide.

use std::sync::{Arc, Mutex};

use djorm_db::model::Annotations;
use djorm_db::{
    count_objects, create_object, delete_object, get_object, list_objects_by_ids, model_signals,
    not, objects, or, q, q_values, refresh_object, save_object, subquery_count, subquery_in,
    update_object, CancelScope, CancelToken, DbExecutor, Dialect, FuncExpr, ModelEvent, OrmError,
    RawExpr, Transaction, TxState, Value,
};
use djorm_db_backends::SqliteBackend;
use djorm_macros::Model;

// ── Models ──────────────────────────────────────────────────────────────

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[model(table = "profiles")]
pub struct Profile {
    #[field(primary_key, auto)]
    pub id: i64,
    pub name: String,
    #[field(unique)]
    pub email: String,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[model(table = "users")]
pub struct User {
    #[field(primary_key, auto)]
    pub id: i64,
    pub name: String,
    #[field(foreign_key, null)]
    pub profile: Option<Box<Profile>>,
    #[field(reverse = "user")]
    pub todos: Vec<Todo>,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[model(table = "todos")]
pub struct Todo {
    #[field(primary_key, auto)]
    pub id: i64,
    pub title: String,
    pub done: bool,
    #[field(foreign_key, null)]
    pub user: Option<Box<User>>,
    #[field(many_to_many)]
    pub tags: Vec<Tag>,
    #[field(annotations)]
    pub annotations: Annotations,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[model(table = "tags", ordering("label"))]
pub struct Tag {
    #[field(primary_key, auto)]
    pub id: i64,
    pub label: String,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[model(table = "categories")]
pub struct Category {
    #[field(primary_key, auto)]
    pub id: i64,
    pub name: String,
    #[field(foreign_key, null)]
    pub parent: Option<Box<Category>>,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[model(table = "notes")]
pub struct Note {
    #[field(primary_key, auto)]
    pub id: i64,
    pub body: String,
    #[field(foreign_key, null)]
    pub user: Option<Box<User>>,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[model(table = "reminders")]
pub struct Reminder {
    #[field(primary_key, auto)]
    pub id: i64,
    pub title: String,
    #[field(foreign_key, null)]
    pub user: Option<Box<User>>,
    #[field(foreign_key, null)]
    pub note: Option<Box<Note>>,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[model(table = "audit_entries")]
pub struct AuditEntry {
    #[field(primary_key, auto)]
    pub id: i64,
    pub message: String,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE profiles (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, email TEXT NOT NULL UNIQUE)",
    "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, profile_id BIGINT REFERENCES profiles(id))",
    "CREATE TABLE todos (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL, done BOOLEAN NOT NULL DEFAULT 0, user_id BIGINT REFERENCES users(id))",
    "CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT NOT NULL)",
    "CREATE TABLE todos_tags (todos_id BIGINT NOT NULL REFERENCES todos(id), tags_id BIGINT NOT NULL REFERENCES tags(id))",
    "CREATE TABLE categories (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, parent_id BIGINT REFERENCES categories(id))",
    "CREATE TABLE audit_entries (id INTEGER PRIMARY KEY AUTOINCREMENT, message TEXT NOT NULL)",
    "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL, user_id BIGINT REFERENCES users(id))",
    "CREATE TABLE reminders (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL, user_id BIGINT REFERENCES users(id), note_id BIGINT REFERENCES notes(id))",
];

async fn setup() -> SqliteBackend {
    let db = SqliteBackend::memory().unwrap();
    for statement in SCHEMA {
        db.execute_sql(statement, &[]).await.unwrap();
    }
    db
}

fn todo(title: &str, done: bool, user: Option<&User>) -> Todo {
    Todo {
        title: title.into(),
        done,
        user: user.map(|u| Box::new(u.clone())),
        ..Todo::default()
    }
}

async fn insert_user(db: &SqliteBackend, name: &str, email: &str) -> User {
    let mut profile = Profile {
        name: format!("{name} profile"),
        email: email.into(),
        ..Profile::default()
    };
    create_object(db, &mut profile).await.unwrap();
    let mut user = User {
        name: name.into(),
        profile: Some(Box::new(profile)),
        ..User::default()
    };
    create_object(db, &mut user).await.unwrap();
    user
}

async fn tag(db: &SqliteBackend, todo: &Todo, label: &str) {
    let mut tag = Tag {
        label: label.into(),
        ..Tag::default()
    };
    create_object(db, &mut tag).await.unwrap();
    db.execute_sql(
        "INSERT INTO todos_tags (todos_id, tags_id) VALUES (?, ?)",
        &[Value::Int(todo.id), Value::Int(tag.id)],
    )
    .await
    .unwrap();
}

// ── Literal scenarios ───────────────────────────────────────────────────

#[tokio::test]
async fn test_filter_order_limit() -> anyhow::Result<()> {
    let db = setup().await;
    let mut todos = vec![
        todo("Test Todo 1", false, None),
        todo("Test Todo 2", true, None),
        todo("Test Todo 3", false, None),
    ];
    assert_eq!(objects::<Todo>().bulk_create(&db, &mut todos).await?, 3);
    assert_eq!(todos.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2, 3]);

    let found = objects::<Todo>()
        .filter(q("title__icontains", "test"))
        .filter_by("done", false)
        .order_by(["-id"])
        .limit(5)
        .all(&db)
        .await?;
    assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3, 1]);
    assert_eq!(found[0].title, "Test Todo 3");
    Ok(())
}

#[tokio::test]
async fn test_get_then_delete() {
    let db = setup().await;
    let mut first = todo("only", false, None);
    create_object(&db, &mut first).await.unwrap();

    let got: Todo = get_object(&db, 1).await.unwrap();
    assert_eq!(got.title, "only");

    assert_eq!(delete_object(&db, &got).await.unwrap(), 1);
    let err = get_object::<Todo>(&db, 1).await.unwrap_err();
    assert!(matches!(err, OrmError::NotFound(_)));
}

#[tokio::test]
async fn test_nested_select_through_two_hops() {
    let db = setup().await;
    let user = insert_user(&db, "test user", "test@example.com").await;
    create_object(&db, &mut todo("with user", false, Some(&user)))
        .await
        .unwrap();

    let rows = objects::<Todo>()
        .select(["id", "title", "user.*", "user.profile.*"])
        .filter(q("user.profile.email__icontains", "example"))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let user = rows[0].user.as_ref().unwrap();
    assert_eq!(user.name, "test user");
    let profile = user.profile.as_ref().unwrap();
    assert_eq!(profile.email, "test@example.com");
    assert_eq!(profile.name, "test user profile");
}

#[tokio::test]
async fn test_bare_relation_select_loads_stub() {
    let db = setup().await;
    let user = insert_user(&db, "stub", "stub@example.com").await;
    create_object(&db, &mut todo("t", false, Some(&user)))
        .await
        .unwrap();

    let row = objects::<Todo>()
        .select(["id", "user"])
        .first(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.title, "");
    let stub = row.user.unwrap();
    assert_eq!(stub.id, user.id);
    assert_eq!(stub.name, "");
}

#[tokio::test]
async fn test_update_matching_rows() {
    let db = setup().await;
    let user = insert_user(&db, "upd", "upd@example.com").await;
    let mut todos = vec![
        todo("testQueryUpdate a", false, Some(&user)),
        todo("TestQueryUpdate b", false, Some(&user)),
        todo("untouched", false, None),
    ];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();

    let affected = objects::<Todo>()
        .filter(q("title__istartswith", "testqueryupdate"))
        .update(&db, &todo("X", false, Some(&user)))
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let titles: Vec<String> = objects::<Todo>()
        .order_by(["id"])
        .values_flat(&db, "title")
        .await
        .unwrap();
    assert_eq!(titles, vec!["X", "X", "untouched"]);
}

#[tokio::test]
async fn test_values_list_declared_order() {
    let db = setup().await;
    let user = insert_user(&db, "vals", "vals@example.com").await;
    let mut todos = vec![
        todo("a", false, Some(&user)),
        todo("b", true, Some(&user)),
        todo("c", false, Some(&user)),
    ];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();

    let rows = objects::<Todo>()
        .order_by(["id"])
        .values_list(&db, ["id", "title", "user.id"])
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.len() == 3));
    assert_eq!(
        rows[1],
        vec![Value::Int(2), Value::from("b"), Value::Int(user.id)]
    );
}

// ── Universal properties ────────────────────────────────────────────────

#[tokio::test]
async fn test_insert_get_round_trip() {
    let db = setup().await;
    let user = insert_user(&db, "rt", "rt@example.com").await;
    let mut original = todo("round trip", true, Some(&user));
    create_object(&db, &mut original).await.unwrap();
    assert!(original.id > 0);

    let loaded: Todo = get_object(&db, original.id).await.unwrap();
    assert_eq!(loaded.title, original.title);
    assert_eq!(loaded.done, original.done);
    assert_eq!(loaded.user.as_ref().map(|u| u.id), Some(user.id));
}

#[tokio::test]
async fn test_count_matches_all_with_to_many_filter() {
    let db = setup().await;
    let mut todos = vec![todo("one", false, None), todo("two", false, None)];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();
    tag(&db, &todos[0], "urgent").await;
    tag(&db, &todos[0], "urgent").await;
    tag(&db, &todos[1], "later").await;

    let qs = objects::<Todo>().filter(q("tags.label", "urgent"));
    let all = qs.all(&db).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(qs.count(&db).await.unwrap(), 1);
    assert!(qs.exists(&db).await.unwrap());
    assert_eq!(count_objects::<Todo>(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_count_matches_all_without_root_key_selected() {
    let db = setup().await;
    let mut item = todo("tagged twice", false, None);
    create_object(&db, &mut item).await.unwrap();
    tag(&db, &item, "x").await;
    tag(&db, &item, "y").await;

    let qs = objects::<Todo>()
        .select(["title", "tags.label"])
        .filter_by("tags.label__startswith", "");
    let all = qs.all(&db).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, item.id);
    let mut labels: Vec<_> = all[0].tags.iter().map(|t| t.label.as_str()).collect();
    labels.sort_unstable();
    assert_eq!(labels, vec!["x", "y"]);
    assert_eq!(qs.count(&db).await.unwrap(), 1);
    assert_eq!(qs.limit(10).count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_same_key_column_on_two_paths_joins_twice() {
    let db = setup().await;
    let alice = insert_user(&db, "alice", "alice@example.com").await;
    let bob = insert_user(&db, "bob", "bob@example.com").await;
    let mut note = Note {
        body: "from bob".into(),
        user: Some(Box::new(bob.clone())),
        ..Note::default()
    };
    create_object(&db, &mut note).await.unwrap();
    let mut reminder = Reminder {
        title: "call".into(),
        user: Some(Box::new(alice.clone())),
        note: Some(Box::new(note.clone())),
        ..Reminder::default()
    };
    create_object(&db, &mut reminder).await.unwrap();

    let qs = objects::<Reminder>()
        .select(["id", "user.*", "note.user.*"])
        .filter_by("note.user.name", "bob");
    let (sql, _) = qs.to_sql(&Dialect::sqlite()).unwrap();
    assert_eq!(sql.matches("JOIN \"users\"").count(), 2);

    let rows = qs.all(&db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user.as_ref().unwrap().name, "alice");
    let note_user = rows[0].note.as_ref().unwrap().user.as_ref().unwrap();
    assert_eq!(note_user.name, "bob");

    let by_direct = objects::<Reminder>()
        .filter_by("user.name", "bob")
        .count(&db)
        .await
        .unwrap();
    assert_eq!(by_direct, 0);
}

#[tokio::test]
async fn test_like_lookups_match_wildcards_literally() {
    let db = setup().await;
    let mut todos = vec![
        todo("50% off", false, None),
        todo("500 items", false, None),
        todo("snake_case", false, None),
        todo("snakeXcase", false, None),
    ];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();

    let titles = objects::<Todo>()
        .filter_by("title__contains", "50%")
        .values_flat::<String>(&db, "title")
        .await
        .unwrap();
    assert_eq!(titles, vec!["50% off"]);
    let titles = objects::<Todo>()
        .filter_by("title__istartswith", "SNAKE_")
        .values_flat::<String>(&db, "title")
        .await
        .unwrap();
    assert_eq!(titles, vec!["snake_case"]);
}

#[tokio::test]
async fn test_compile_is_deterministic() {
    let dialect = Dialect::sqlite();
    let qs = objects::<Todo>()
        .select(["id", "user.profile.*"])
        .filter(q("user.profile.email__icontains", "x"))
        .filter(q("tags.label", "y"))
        .order_by(["-user.name"]);
    let first = qs.to_sql(&dialect).unwrap();
    let second = qs.to_sql(&dialect).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.1, vec![Value::from("%x%"), Value::from("y")]);
}

#[tokio::test]
async fn test_default_ordering_applies() {
    let db = setup().await;
    for label in ["b", "c", "a"] {
        let mut t = Tag {
            label: label.into(),
            ..Tag::default()
        };
        create_object(&db, &mut t).await.unwrap();
    }
    let labels: Vec<String> = objects::<Tag>().values_flat(&db, "label").await.unwrap();
    assert_eq!(labels, vec!["a", "b", "c"]);
}

// ── Relations ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_many_to_many_select_groups_by_root() {
    let db = setup().await;
    let mut todos = vec![todo("tagged", false, None), todo("bare", false, None)];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();
    tag(&db, &todos[0], "red").await;
    tag(&db, &todos[0], "blue").await;

    let rows = objects::<Todo>()
        .select(["*", "tags.*"])
        .order_by(["id"])
        .all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let mut labels: Vec<&str> = rows[0].tags.iter().map(|t| t.label.as_str()).collect();
    labels.sort_unstable();
    assert_eq!(labels, vec!["blue", "red"]);
    assert!(rows[1].tags.is_empty());
}

#[tokio::test]
async fn test_reverse_relation_select() {
    let db = setup().await;
    let ann = insert_user(&db, "ann", "ann@example.com").await;
    let bob = insert_user(&db, "bob", "bob@example.com").await;
    let mut todos = vec![
        todo("a1", false, Some(&ann)),
        todo("a2", false, Some(&ann)),
        todo("b1", false, Some(&bob)),
    ];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();

    let users = objects::<User>()
        .select(["*", "todos.*"])
        .order_by(["name"])
        .all(&db)
        .await
        .unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].todos.len(), 2);
    assert_eq!(users[1].todos.len(), 1);
    assert_eq!(users[1].todos[0].title, "b1");
}

#[tokio::test]
async fn test_self_referential_filter() {
    let db = setup().await;
    let mut root = Category {
        name: "root".into(),
        ..Category::default()
    };
    create_object(&db, &mut root).await.unwrap();
    let mut child = Category {
        name: "child".into(),
        parent: Some(Box::new(root.clone())),
        ..Category::default()
    };
    create_object(&db, &mut child).await.unwrap();
    let mut grandchild = Category {
        name: "grandchild".into(),
        parent: Some(Box::new(child.clone())),
        ..Category::default()
    };
    create_object(&db, &mut grandchild).await.unwrap();

    let found = objects::<Category>()
        .select(["*", "parent.*", "parent.parent.*"])
        .filter(q("parent.parent.name", "root"))
        .get(&db)
        .await
        .unwrap();
    assert_eq!(found.name, "grandchild");
    let parent = found.parent.unwrap();
    assert_eq!(parent.name, "child");
    assert_eq!(parent.parent.unwrap().name, "root");
}

#[tokio::test]
async fn test_left_join_miss_leaves_relation_empty() {
    let db = setup().await;
    create_object(&db, &mut todo("orphan", false, None))
        .await
        .unwrap();
    let row = objects::<Todo>()
        .select(["*", "user.*"])
        .get(&db)
        .await
        .unwrap();
    assert!(row.user.is_none());
}

// ── Expressions ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_exclude_or_and_in() {
    let db = setup().await;
    let mut todos = vec![
        todo("alpha", false, None),
        todo("beta", true, None),
        todo("gamma", false, None),
        todo("delta", true, None),
    ];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();

    let ids: Vec<i64> = objects::<Todo>()
        .filter(or([q("title", "alpha"), q("title", "delta")]))
        .order_by(["id"])
        .values_flat(&db, "id")
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 4]);

    let ids: Vec<i64> = objects::<Todo>()
        .exclude(q("done", true))
        .order_by(["id"])
        .values_flat(&db, "id")
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 3]);

    let ids: Vec<i64> = objects::<Todo>()
        .filter(q_values("id__in", [2_i64, 3]))
        .filter(not(q("title__startswith", "g")))
        .values_flat(&db, "id")
        .await
        .unwrap();
    assert_eq!(ids, vec![2]);

    let found =
        list_objects_by_ids::<Todo>(&db, 0, 10, vec![Value::Int(4), Value::Int(1)])
            .await
            .unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn test_subquery_in_and_count() {
    let db = setup().await;
    let ann = insert_user(&db, "ann", "a@example.com").await;
    let bob = insert_user(&db, "bob", "b@example.com").await;
    let mut todos = vec![
        todo("ann's", false, Some(&ann)),
        todo("bob's", false, Some(&bob)),
    ];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();

    let users = objects::<User>().filter(q("name", "bob"));
    let titles: Vec<String> = objects::<Todo>()
        .filter(subquery_in("user", &users))
        .values_flat(&db, "title")
        .await
        .unwrap();
    assert_eq!(titles, vec!["bob's"]);

    let rows = objects::<Todo>()
        .annotate("user_count", subquery_count(&objects::<User>()))
        .order_by(["id"])
        .all(&db)
        .await
        .unwrap();
    assert_eq!(rows[0].annotations.get("user_count"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn test_annotations_and_raw_filters() {
    let db = setup().await;
    let mut todos = vec![todo("quiet", false, None), todo("loud", false, None)];
    objects::<Todo>().bulk_create(&db, &mut todos).await.unwrap();

    let rows = objects::<Todo>()
        .annotate("shout", FuncExpr::new("UPPER(%s)", ["title"], []))
        .filter(RawExpr::new("%s > ?", ["id"], [Value::Int(1)]))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "loud");
    assert_eq!(rows[0].annotations.get("shout"), Some(&Value::from("LOUD")));
}

#[tokio::test]
async fn test_unknown_path_fails_before_any_statement() {
    let db = setup().await;
    let err = objects::<Todo>()
        .filter(q("user.nope", 1))
        .all(&db)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::UnknownField { .. }));
    assert!(err.is_shape_error());

    let err = objects::<Todo>()
        .filter(q("title.name", 1))
        .count(&db)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::UnreachableRelation { .. }));
}

// ── Writes ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_save_updates_or_inserts() {
    let db = setup().await;
    let mut item = todo("draft", false, None);
    assert!(save_object(&db, &mut item).await.unwrap());
    assert_eq!(item.id, 1);

    item.title = "final".into();
    assert!(!save_object(&db, &mut item).await.unwrap());
    assert_eq!(count_objects::<Todo>(&db).await.unwrap(), 1);

    let mut stale = Todo {
        id: item.id,
        ..Todo::default()
    };
    refresh_object(&db, &mut stale).await.unwrap();
    assert_eq!(stale.title, "final");
}

#[tokio::test]
async fn test_explicit_save_writes_zero_values() {
    let db = setup().await;
    let mut item = todo("done already", true, None);
    create_object(&db, &mut item).await.unwrap();

    let partial = Todo::default();
    let skipped = objects::<Todo>()
        .filter_by("id", item.id)
        .update(&db, &partial)
        .await
        .unwrap();
    assert_eq!(skipped, 0);

    let affected = objects::<Todo>()
        .filter_by("id", item.id)
        .select(["done"])
        .explicit_save()
        .update(&db, &partial)
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let reloaded: Todo = get_object(&db, item.id).await.unwrap();
    assert!(!reloaded.done);
    assert_eq!(reloaded.title, "done already");
}

#[tokio::test]
async fn test_update_object_by_unique_field() {
    let db = setup().await;
    insert_user(&db, "uniq", "uniq@example.com").await;
    let by_email = Profile {
        name: "renamed".into(),
        email: "uniq@example.com".into(),
        ..Profile::default()
    };
    assert_eq!(update_object(&db, &by_email).await.unwrap(), 1);
    let names: Vec<String> = objects::<Profile>()
        .values_flat(&db, "name")
        .await
        .unwrap();
    assert_eq!(names, vec!["renamed"]);
}

#[tokio::test]
async fn test_unguarded_writes_are_refused() {
    let db = setup().await;
    let err = objects::<Todo>().delete(&db).await.unwrap_err();
    assert!(matches!(err, OrmError::UnsafeDelete(_)));

    let err = update_object(&db, &Todo::default()).await.unwrap_err();
    assert!(matches!(err, OrmError::NoUniqueKey(_)));

    let err = objects::<Todo>()
        .update(&db, &Todo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::UnsafeUpdate(_)));
}

#[tokio::test]
async fn test_driver_error_is_kept_verbatim() {
    let db = setup().await;
    insert_user(&db, "dup", "dup@example.com").await;
    let mut clash = Profile {
        name: "again".into(),
        email: "dup@example.com".into(),
        ..Profile::default()
    };
    let err = create_object(&db, &mut clash).await.unwrap_err();
    assert!(matches!(err, OrmError::Driver(_)));
    assert!(err.to_string().contains("UNIQUE"));
}

// ── Transactions ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_transaction_rollback_discards_writes() {
    let db = setup().await;
    create_object(&db, &mut todo("kept", false, None))
        .await
        .unwrap();

    let tx = Transaction::begin(&db).await.unwrap();
    create_object(&tx, &mut todo("discarded", false, None))
        .await
        .unwrap();
    assert_eq!(count_objects::<Todo>(&tx).await.unwrap(), 2);
    tx.rollback().await.unwrap();
    assert_eq!(tx.state().await, TxState::RolledBack);

    assert_eq!(count_objects::<Todo>(&db).await.unwrap(), 1);
    let err = count_objects::<Todo>(&tx).await.unwrap_err();
    assert!(matches!(err, OrmError::NoTransaction(_)));
}

#[tokio::test]
async fn test_transaction_commit_keeps_writes() -> anyhow::Result<()> {
    let db = setup().await;
    let tx = Transaction::begin(&db).await?;
    let mut items = vec![todo("a", false, None), todo("b", false, None)];
    objects::<Todo>().bulk_create(&tx, &mut items).await?;
    objects::<Todo>().filter_by("title", "a").delete(&tx).await?;
    tx.commit().await?;

    let titles: Vec<String> = objects::<Todo>().values_flat(&db, "title").await?;
    assert_eq!(titles, vec!["b"]);
    assert!(matches!(tx.commit().await, Err(OrmError::NoTransaction(_))));
    Ok(())
}

// ── Hooks ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_write_hooks_fire_in_order() {
    let db = setup().await;
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let record = |label: &'static str| {
        let seen = Arc::clone(&seen);
        Arc::new(move |e: &ModelEvent| {
            if e.table == "audit_entries" {
                seen.lock().unwrap().push(format!("{label}:{}", e.created));
            }
        })
    };
    let signals = model_signals();
    signals.pre_save.connect("audit-pre-save", record("pre_save"));
    signals.post_save.connect("audit-post-save", record("post_save"));
    signals.pre_delete.connect("audit-pre-delete", record("pre_delete"));
    signals.post_delete.connect("audit-post-delete", record("post_delete"));

    let mut entry = AuditEntry {
        message: "hello".into(),
        ..AuditEntry::default()
    };
    create_object(&db, &mut entry).await.unwrap();
    entry.message = "changed".into();
    update_object(&db, &entry).await.unwrap();
    delete_object(&db, &entry).await.unwrap();

    signals.pre_save.disconnect("audit-pre-save");
    signals.post_save.disconnect("audit-post-save");
    signals.pre_delete.disconnect("audit-pre-delete");
    signals.post_delete.disconnect("audit-post-delete");

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "pre_save:true",
            "post_save:true",
            "pre_save:false",
            "post_save:false",
            "pre_delete:false",
            "post_delete:false",
        ]
    );
}

// ── Cancellation ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_scope_runs_nothing() {
    let db = setup().await;
    create_object(&db, &mut todo("still here", false, None))
        .await
        .unwrap();

    let token = CancelToken::new();
    let scoped = CancelScope::new(&db, token.clone());
    assert_eq!(count_objects::<Todo>(&scoped).await.unwrap(), 1);

    token.cancel();
    let err = objects::<Todo>().all(&scoped).await.unwrap_err();
    assert!(matches!(err, OrmError::Cancelled));
    let err = objects::<Todo>()
        .filter_by("id", 1)
        .delete(&scoped)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Cancelled));
    assert_eq!(count_objects::<Todo>(&db).await.unwrap(), 1);
}
