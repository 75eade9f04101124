/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Node registry: cluster membership rows and their health counters.

use diesel::prelude::*;
use tracing::{info, warn};

use super::models::{now_naive, NewNodeRow, NodeRow};
use super::{WriteTransaction, DAL};
use crate::database::schema::{apps, nodes};
use crate::error::StoreError;
use crate::models::{NewNode, Node, NodeStatus};
use crate::with_connection;

/// Data access layer for cluster nodes.
#[derive(Clone)]
pub struct NodeDAL<'a> {
    dal: &'a DAL,
}

impl<'a> NodeDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Registers a node.
    ///
    /// A duplicate id or name, or a second primary, fails with
    /// [`StoreError::Conflict`].
    pub async fn create_node(&self, new_node: NewNode) -> Result<Node, StoreError> {
        let row = NewNodeRow::from_new(new_node, now_naive());
        let created = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                diesel::insert_into(nodes::table).values(&row).execute(conn)?;
                Ok(nodes::table
                    .find(&row.id)
                    .select(NodeRow::as_select())
                    .first(conn)?)
            })
        });

        let node = Node::try_from(created)?;
        info!(
            node_id = %node.id,
            name = %node.name,
            primary = node.is_primary,
            "Node registered"
        );
        Ok(node)
    }

    /// Registers a primary node and assigns every application without a node
    /// to it, in one transaction.
    ///
    /// This is the upgrade path from a single-node install. Returns the node
    /// and the number of applications migrated.
    pub async fn register_primary(&self, new_node: NewNode) -> Result<(Node, usize), StoreError> {
        let row = NewNodeRow::from_new(
            NewNode {
                is_primary: true,
                ..new_node
            },
            now_naive(),
        );

        let (created, migrated) = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                diesel::insert_into(nodes::table).values(&row).execute(conn)?;
                let migrated = diesel::update(apps::table.filter(apps::node_id.is_null()))
                    .set((
                        apps::node_id.eq(Some(&row.id)),
                        apps::updated_at.eq(row.created_at),
                    ))
                    .execute(conn)?;
                let created: NodeRow = nodes::table
                    .find(&row.id)
                    .select(NodeRow::as_select())
                    .first(conn)?;
                Ok((created, migrated))
            })
        });

        let node = Node::try_from(created)?;
        info!(node_id = %node.id, name = %node.name, migrated, "Primary node registered");
        Ok((node, migrated))
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<Node>, StoreError> {
        let id = node_id.to_string();
        let row = with_connection!(self.dal.database, |conn| {
            Ok(nodes::table
                .find(&id)
                .select(NodeRow::as_select())
                .first(conn)
                .optional()?)
        });
        row.map(Node::try_from).transpose()
    }

    pub async fn get_node_by_name(&self, name: &str) -> Result<Option<Node>, StoreError> {
        let name = name.to_string();
        let row = with_connection!(self.dal.database, |conn| {
            Ok(nodes::table
                .filter(nodes::name.eq(&name))
                .select(NodeRow::as_select())
                .first(conn)
                .optional()?)
        });
        row.map(Node::try_from).transpose()
    }

    /// All nodes, primary first, then by registration time.
    pub async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let rows = with_connection!(self.dal.database, |conn| {
            Ok(nodes::table
                .order((
                    nodes::is_primary.desc(),
                    nodes::created_at.asc(),
                    nodes::id.asc(),
                ))
                .select(NodeRow::as_select())
                .load(conn)?)
        });
        rows.into_iter().map(Node::try_from).collect()
    }

    pub async fn get_primary(&self) -> Result<Option<Node>, StoreError> {
        let row = with_connection!(self.dal.database, |conn| {
            Ok(nodes::table
                .filter(nodes::is_primary.eq(true))
                .order(nodes::created_at.asc())
                .select(NodeRow::as_select())
                .first(conn)
                .optional()?)
        });
        row.map(Node::try_from).transpose()
    }

    pub async fn count_nodes(&self) -> Result<i64, StoreError> {
        let count = with_connection!(self.dal.database, |conn| {
            Ok(nodes::table.count().get_result::<i64>(conn)?)
        });
        Ok(count)
    }

    /// Removes a node row and unassigns its applications. Returns `false`
    /// if it did not exist.
    pub async fn delete_node(&self, node_id: &str) -> Result<bool, StoreError> {
        let id = node_id.to_string();
        let deleted = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                // SQLite only honours ON DELETE SET NULL with foreign_keys enabled
                diesel::update(apps::table.filter(apps::node_id.eq(&id)))
                    .set((
                        apps::node_id.eq(None::<String>),
                        apps::updated_at.eq(now_naive()),
                    ))
                    .execute(conn)?;
                Ok(diesel::delete(nodes::table.find(&id)).execute(conn)?)
            })
        });
        if deleted > 0 {
            info!(node_id = %node_id, "Node removed");
        }
        Ok(deleted > 0)
    }

    /// Marks a node online after a successful health check.
    pub async fn record_health_success(&self, node_id: &str) -> Result<(), StoreError> {
        let id = node_id.to_string();
        let updated = with_connection!(self.dal.database, |conn| {
            let now = now_naive();
            Ok(diesel::update(nodes::table.find(&id))
                .set((
                    nodes::consecutive_failures.eq(0),
                    nodes::status.eq(NodeStatus::Online.as_str()),
                    nodes::last_seen.eq(Some(now)),
                    nodes::last_health_check.eq(Some(now)),
                    nodes::updated_at.eq(now),
                ))
                .execute(conn)?)
        });
        if updated == 0 {
            return Err(StoreError::node_not_found(node_id));
        }
        Ok(())
    }

    /// Counts a failed health check; the node goes offline once
    /// `offline_after` consecutive failures accumulate. Returns the new
    /// failure count.
    pub async fn record_health_failure(
        &self,
        node_id: &str,
        offline_after: i32,
    ) -> Result<i32, StoreError> {
        let id = node_id.to_string();
        let failures = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let now = now_naive();
                let updated = diesel::update(nodes::table.find(&id))
                    .set((
                        nodes::consecutive_failures.eq(nodes::consecutive_failures + 1),
                        nodes::last_health_check.eq(Some(now)),
                        nodes::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                if updated == 0 {
                    return Err(StoreError::node_not_found(id.clone()));
                }

                let failures: i32 = nodes::table
                    .find(&id)
                    .select(nodes::consecutive_failures)
                    .first(conn)?;
                if failures >= offline_after {
                    diesel::update(nodes::table.find(&id))
                        .set(nodes::status.eq(NodeStatus::Offline.as_str()))
                        .execute(conn)?;
                }
                Ok(failures)
            })
        });

        if failures == offline_after {
            warn!(node_id = %node_id, failures, "Node marked offline");
        }
        Ok(failures)
    }

    /// Assigns every application without a node to `node_id`. Returns the
    /// number of applications updated.
    pub async fn assign_orphan_apps(&self, node_id: &str) -> Result<usize, StoreError> {
        let id = node_id.to_string();
        let migrated = with_connection!(self.dal.database, |conn| {
            let now = now_naive();
            Ok(diesel::update(apps::table.filter(apps::node_id.is_null()))
                .set((apps::node_id.eq(Some(&id)), apps::updated_at.eq(now)))
                .execute(conn)?)
        });
        if migrated > 0 {
            info!(node_id = %node_id, migrated, "Orphan apps assigned to node");
        }
        Ok(migrated)
    }

    /// Number of applications with no node assignment.
    pub async fn count_orphan_apps(&self) -> Result<i64, StoreError> {
        let count = with_connection!(self.dal.database, |conn| {
            Ok(apps::table
                .filter(apps::node_id.is_null())
                .count()
                .get_result::<i64>(conn)?)
        });
        Ok(count)
    }
}
