//! Integration Tests for QueryEngine
//!
//! These tests run the queries against a real libsql database seeded with
//! the ELECTRONICS fixture through legacy import and rebuild.

#[cfg(test)]
mod tests {
    use crate::db::DatabaseService;
    use crate::models::LegacyNode;
    use crate::services::config::HierarchyConfig;
    use crate::services::error::HierarchyError;
    use crate::services::migrator::TreeMigrator;
    use crate::services::query_service::QueryEngine;
    use crate::services::tenant_lock::TenantLocks;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Helper to create a query engine over a freshly rebuilt fixture
    async fn create_test_engine() -> (QueryEngine, TreeMigrator, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Arc::new(DatabaseService::new(db_path).await.unwrap());
        let migrator = TreeMigrator::new(
            Arc::clone(&db),
            Arc::new(TenantLocks::new()),
            HierarchyConfig::default(),
        );
        migrator.import_legacy(1, fixture()).await.unwrap();
        migrator.rebuild(1).await.unwrap();

        (QueryEngine::new(db), migrator, temp_dir)
    }

    fn fixture() -> Vec<LegacyNode> {
        vec![
            LegacyNode::new("1", "ELECTRONICS", None),
            LegacyNode::new("2", "TELEVISIONS", Some("1")),
            LegacyNode::new("3", "TUBE", Some("2")),
            LegacyNode::new("4", "LCD", Some("2")),
            LegacyNode::new("5", "PLASMA", Some("2")),
            LegacyNode::new("6", "PORTABLE ELECTRONICS", Some("1")),
            LegacyNode::new("7", "MP3 PLAYERS", Some("6")),
            LegacyNode::new("8", "FLASH", Some("7")),
            LegacyNode::new("9", "CD PLAYERS", Some("6")),
            LegacyNode::new("10", "2 WAY RADIOS", Some("6")),
        ]
    }

    fn titles(nodes: &[crate::models::Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_get_node_returns_bounds() {
        let (engine, _migrator, _temp) = create_test_engine().await;

        let node = engine.get_node(1, "7").await.unwrap();
        assert_eq!(node.title, "MP3 PLAYERS");
        assert_eq!((node.left(), node.right()), (11, 14));
        assert_eq!(node.parent_id.as_deref(), Some("6"));
    }

    #[tokio::test]
    async fn test_get_parents_root_first() {
        let (engine, _migrator, _temp) = create_test_engine().await;

        let parents = engine.get_parents(1, "8").await.unwrap();
        assert_eq!(
            titles(&parents),
            vec!["ELECTRONICS", "PORTABLE ELECTRONICS", "MP3 PLAYERS"]
        );

        assert!(engine.get_parents(1, "1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_children_one_level_only() {
        let (engine, _migrator, _temp) = create_test_engine().await;

        let children = engine.get_children(1, "6").await.unwrap();
        assert_eq!(
            titles(&children),
            vec!["MP3 PLAYERS", "CD PLAYERS", "2 WAY RADIOS"]
        );

        let roots_children = engine.get_children(1, "1").await.unwrap();
        assert_eq!(
            titles(&roots_children),
            vec!["TELEVISIONS", "PORTABLE ELECTRONICS"]
        );

        assert!(engine.get_children(1, "8").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_descendants_in_preorder() {
        let (engine, _migrator, _temp) = create_test_engine().await;

        let descendants = engine.get_descendants(1, "6").await.unwrap();
        assert_eq!(
            titles(&descendants),
            vec!["MP3 PLAYERS", "FLASH", "CD PLAYERS", "2 WAY RADIOS"]
        );
    }

    #[tokio::test]
    async fn test_list_tree_depths() {
        let (engine, _migrator, _temp) = create_test_engine().await;

        let labels: Vec<String> = engine
            .list_tree(1)
            .await
            .unwrap()
            .iter()
            .map(|e| e.label())
            .collect();
        assert_eq!(
            labels,
            vec![
                "0-ELECTRONICS",
                "1-TELEVISIONS",
                "2-TUBE",
                "2-LCD",
                "2-PLASMA",
                "1-PORTABLE ELECTRONICS",
                "2-MP3 PLAYERS",
                "3-FLASH",
                "2-CD PLAYERS",
                "2-2 WAY RADIOS",
            ]
        );
    }

    #[tokio::test]
    async fn test_roots_and_verify() {
        let (engine, _migrator, _temp) = create_test_engine().await;

        let roots = engine.get_roots(1).await.unwrap();
        assert_eq!(titles(&roots), vec!["ELECTRONICS"]);
        assert_eq!(engine.verify(1).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_missing_node_is_not_found() {
        let (engine, _migrator, _temp) = create_test_engine().await;

        let err = engine.get_parents(1, "404").await.unwrap_err();
        assert!(matches!(err, HierarchyError::NotFound { tenant: 1, .. }));

        // Same id, other tenant
        let err = engine.get_node(2, "8").await.unwrap_err();
        assert!(matches!(err, HierarchyError::NotFound { tenant: 2, .. }));
    }

    #[tokio::test]
    async fn test_empty_id_is_invalid_argument() {
        let (engine, _migrator, _temp) = create_test_engine().await;

        let err = engine.get_children(1, "").await.unwrap_err();
        assert!(matches!(err, HierarchyError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unindexed_tenant_is_reported() {
        let (engine, migrator, _temp) = create_test_engine().await;

        migrator
            .import_legacy(1, vec![LegacyNode::new("11", "DVD PLAYERS", Some("2"))])
            .await
            .unwrap();

        let err = engine.list_tree(1).await.unwrap_err();
        assert!(matches!(
            err,
            HierarchyError::NotIndexed {
                tenant: 1,
                unindexed: 1
            }
        ));

        migrator.rebuild(1).await.unwrap();
        let children = engine.get_children(1, "2").await.unwrap();
        assert_eq!(titles(&children), vec!["TUBE", "LCD", "PLASMA", "DVD PLAYERS"]);
    }
}
