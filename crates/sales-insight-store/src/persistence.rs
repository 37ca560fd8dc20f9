//! JSON snapshots of the in-memory store.
//!
//! A snapshot is the full table contents in one pretty-printed JSON document.
//! Loading replays every row through the same checks as the write API, so a
//! hand-edited snapshot with a dangling `productId` is rejected up front.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::{InMemoryStore, Order, OrderItem, Product, Tables, User};
use crate::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub order_items: Vec<OrderItem>,
}

impl InMemoryStore {
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let mut tables = Tables::default();
        for user in snapshot.users {
            tables.insert_user(user)?;
        }
        for product in snapshot.products {
            tables.insert_product(product)?;
        }
        for order in snapshot.orders {
            tables.insert_order(order)?;
        }
        for item in snapshot.order_items {
            tables.insert_order_item(item)?;
        }
        Ok(Self {
            tables: parking_lot::RwLock::new(tables),
        })
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let tables = self.tables.read();
        StoreSnapshot {
            users: tables.users.clone(),
            products: tables.products.clone(),
            orders: tables.orders.clone(),
            order_items: tables.order_items.clone(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let snapshot: StoreSnapshot = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
        let store = Self::from_snapshot(snapshot)
            .with_context(|| format!("inconsistent snapshot {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            products = store.tables.read().products.len(),
            orders = store.tables.read().orders.len(),
            "loaded store snapshot"
        );
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        Ok(())
    }
}

/// Where the store's data comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot to load. `None` starts from the built-in demo data.
    pub snapshot_path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn open(&self) -> anyhow::Result<InMemoryStore> {
        match &self.snapshot_path {
            Some(path) => InMemoryStore::load(path),
            None => {
                tracing::info!("no snapshot configured, using demo data");
                Ok(InMemoryStore::from_snapshot(demo_snapshot())?)
            }
        }
    }
}

// ============================================================================
// Demo data
// ============================================================================

fn demo_id(n: u128) -> String {
    Uuid::from_u128(0x5a1e_0000_0000_4000_8000_0000_0000_0000 | n).to_string()
}

fn demo_time(day: i64) -> DateTime<Utc> {
    // 2024-03-01T00:00:00Z plus `day` days.
    Utc.timestamp_opt(1_709_251_200 + day * 86_400, 0)
        .single()
        .unwrap_or_default()
}

/// Two shoppers in different regions and four small orders.
///
/// Across both regions the order-item subtotals per category are
/// Electronics 2597, Furniture 4697 and Outdoor 307.
pub fn demo_snapshot() -> StoreSnapshot {
    let users = vec![
        User {
            id: demo_id(0x1),
            email: "tom@test.com".into(),
            name: Some("Tom".into()),
            region: "Washington".into(),
        },
        User {
            id: demo_id(0x2),
            email: "jerry@test.com".into(),
            name: Some("Jerry".into()),
            region: "California".into(),
        },
    ];

    let catalog = [
        (0x10, "iPhone 15", "Electronics", 1099.0),
        (0x11, "Nintendo Switch", "Electronics", 399.0),
        (0x12, "Ultra Confirm Futon", "Furniture", 299.0),
        (0x13, "Luxury Leather Sofa", "Furniture", 2199.0),
        (0x14, "2-Person Tent", "Outdoor", 89.0),
        (0x15, "Barbecue Grill with Stand", "Outdoor", 129.0),
    ];
    let products = catalog
        .iter()
        .map(|(n, name, category, price)| Product {
            id: demo_id(*n),
            name: (*name).into(),
            category: (*category).into(),
            price: *price,
        })
        .collect();

    // (order, region, day, [(product, quantity)])
    let placed: [(u128, &str, i64, &[(u128, i64)]); 4] = [
        (0x20, "Washington", 0, &[(0x14, 2), (0x15, 1)]),
        (0x21, "Washington", 3, &[(0x10, 1), (0x13, 1)]),
        (0x22, "California", 5, &[(0x10, 1), (0x11, 1)]),
        (0x23, "California", 9, &[(0x13, 1), (0x12, 1)]),
    ];

    let mut orders = Vec::new();
    let mut order_items = Vec::new();
    let mut next_item = 0x100;
    for (order, region, day, lines) in placed {
        orders.push(Order {
            id: demo_id(order),
            created_at: demo_time(day),
            updated_at: demo_time(day),
            region: region.into(),
        });
        for (product, quantity) in lines {
            order_items.push(OrderItem {
                id: demo_id(next_item),
                quantity: *quantity,
                product_id: demo_id(*product),
                order_id: demo_id(order),
            });
            next_item += 1;
        }
    }

    StoreSnapshot {
        users,
        products,
        orders,
        order_items,
    }
}
