//! Translation of queued operations into remote calls.

use crate::operation::{SyncAction, SyncOperation};
use holdfast_remote::{Filter, RemoteResult, RemoteService};
use holdfast_types::json::ID_FIELD;
use serde_json::Value;
use std::sync::Arc;

/// Column scoping every row to its owner.
pub const USER_ID_FIELD: &str = "user_id";

/// Sends one operation on behalf of `actor`. Returns the row the server
/// reported back, if any.
pub(crate) async fn send(
    conn: Arc<dyn RemoteService>,
    op: SyncOperation,
    actor: String,
) -> RemoteResult<Option<Value>> {
    let table = op.kind.table();
    match op.action {
        SyncAction::Add => {
            let mut row = op.payload;
            if let Some(obj) = row.as_object_mut() {
                if op.entity_id.is_temporary() {
                    obj.remove(ID_FIELD);
                } else {
                    obj.insert(ID_FIELD.to_string(), Value::String(op.entity_id.into_string()));
                }
                obj.insert(USER_ID_FIELD.to_string(), Value::String(actor));
            }
            conn.insert(table, row).await.map(Some)
        }
        SyncAction::Update => {
            let mut patch = op.payload;
            if let Some(obj) = patch.as_object_mut() {
                obj.remove(ID_FIELD);
                obj.remove(USER_ID_FIELD);
            }
            let filter = owned_row(&op.entity_id.into_string(), actor);
            let rows = conn.update(table, &filter, patch).await?;
            Ok(rows.into_iter().next())
        }
        SyncAction::Remove => {
            let filter = owned_row(&op.entity_id.into_string(), actor);
            conn.delete(table, &filter).await?;
            Ok(None)
        }
    }
}

fn owned_row(id: &str, actor: String) -> Filter {
    Filter::by(ID_FIELD, id).eq(USER_ID_FIELD, actor)
}
