use std::collections::HashMap;

use crate::error::{BatchItemError, RelgraphError, Result};
use crate::model::{Edge, NewEdge};

use super::rows::{active_duplicate_exists, duplicate_error, edge_key, insert_edge, prepare_edge};
use super::EdgeStore;

impl EdgeStore {
    /// Create many edges atomically.
    ///
    /// Every item is checked before anything is written. If any item is
    /// rejected the whole batch fails with `BatchValidation` listing all of
    /// them; otherwise all edges are inserted in one transaction.
    pub async fn create_edges_batch(&self, news: Vec<NewEdge>) -> Result<Vec<Edge>> {
        if news.is_empty() {
            return Ok(Vec::new());
        }
        let total = news.len();
        let entities = self.entities.clone();

        let edges = self
            .db
            .with_connection(move |conn| {
                let mut errors = Vec::new();
                let mut prepared = Vec::with_capacity(news.len());
                let mut seen = HashMap::new();

                for (index, new) in news.into_iter().enumerate() {
                    if let Some(registry) = &entities {
                        if let Some(missing) = [&new.source, &new.target]
                            .into_iter()
                            .find(|e| !registry.exists(e))
                        {
                            let err = RelgraphError::UnknownEntity(missing.clone());
                            errors.push(BatchItemError::from_error(index, &err));
                            continue;
                        }
                    }

                    let edge = match prepare_edge(conn, new) {
                        Ok(edge) => edge,
                        Err(err) => {
                            errors.push(BatchItemError::from_error(index, &err));
                            continue;
                        }
                    };

                    if let Some(first) = seen.insert(edge_key(&edge), index) {
                        let mut item = BatchItemError::from_error(index, &duplicate_error(&edge));
                        item.reason = format!("{} (repeats item {})", item.reason, first);
                        errors.push(item);
                        continue;
                    }
                    if active_duplicate_exists(conn, &edge)? {
                        errors.push(BatchItemError::from_error(index, &duplicate_error(&edge)));
                        continue;
                    }
                    prepared.push((index, edge));
                }

                if !errors.is_empty() {
                    return Err(RelgraphError::BatchValidation(errors));
                }

                let tx = conn.transaction()?;
                for (index, edge) in &prepared {
                    if let Err(err) = insert_edge(&tx, edge) {
                        // Dropping the transaction rolls back the earlier inserts
                        return match err {
                            RelgraphError::Database(_) => Err(err),
                            other => Err(RelgraphError::BatchValidation(vec![
                                BatchItemError::from_error(*index, &other),
                            ])),
                        };
                    }
                }
                tx.commit()?;

                Ok(prepared.into_iter().map(|(_, edge)| edge).collect::<Vec<_>>())
            })
            .await;

        match &edges {
            Ok(_) => {
                self.edges_changed();
                log::info!("Created {} edges in batch", total)
            }
            Err(RelgraphError::BatchValidation(items)) => {
                log::warn!("Rejected batch of {}: {} invalid item(s)", total, items.len())
            }
            Err(_) => {}
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{RejectionKind, RelgraphError};
    use crate::model::{NewEdge, Scope};
    use crate::store::EdgeStore;
    use crate::test_support::{entity, seeded_db};

    #[tokio::test]
    async fn test_batch_creates_all() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let detail = entity("detail");
        let news = vec![
            NewEdge::new(detail.clone(), "USES", entity("material")),
            NewEdge::new(detail.clone(), "USES", entity("material")),
            NewEdge::new(detail.clone(), "REFERENCES", entity("spec")),
        ];

        let edges = store.create_edges_batch(news).await.unwrap();
        assert_eq!(edges.len(), 3);
        assert_eq!(store.count_edges(Scope::all(), true).await.unwrap(), 3);
        for edge in &edges {
            assert_eq!(store.get_edge(edge.edge_id).await.unwrap(), *edge);
        }
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing_and_lists_every_error() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let detail = entity("detail");
        let material = entity("material");
        let news = vec![
            NewEdge::new(detail.clone(), "USES", material.clone()),
            NewEdge::new(detail.clone(), "BOGUS", material.clone()),
            NewEdge::new(detail.clone(), "USES", material.clone()),
            NewEdge::new(material.clone(), "USES", detail.clone()),
            NewEdge::new(detail.clone(), "REFERENCES", entity("spec")),
        ];

        let err = store.create_edges_batch(news).await.unwrap_err();
        let RelgraphError::BatchValidation(items) = err else {
            panic!("expected batch validation error");
        };
        let summary: Vec<_> = items.iter().map(|i| (i.index, i.kind)).collect();
        assert_eq!(
            summary,
            vec![
                (1, RejectionKind::InvalidRelationshipType),
                (2, RejectionKind::DuplicateEdge),
                (3, RejectionKind::TypeMismatch),
            ]
        );
        assert!(items[1].reason.contains("repeats item 0"));
        assert_eq!(store.count_edges(Scope::all(), false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_rejects_existing_duplicate() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let existing = NewEdge::new(entity("detail"), "USES", entity("material"));
        store.create_edge(existing.clone()).await.unwrap();

        let err = store
            .create_edges_batch(vec![
                NewEdge::new(entity("detail"), "USES", entity("material")),
                existing,
            ])
            .await
            .unwrap_err();
        match err {
            RelgraphError::BatchValidation(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].index, 1);
                assert_eq!(items[0].kind, RejectionKind::DuplicateEdge);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count_edges(Scope::all(), true).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        assert!(store.create_edges_batch(Vec::new()).await.unwrap().is_empty());
    }
}
