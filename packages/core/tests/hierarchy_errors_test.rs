//! Integration tests for the error taxonomy
//!
//! Every failing mutation must leave the tenant exactly as it was.

use anyhow::Result;
use nodespace_hierarchy::{HierarchyConfig, HierarchyError, HierarchyService, LegacyNode};
use tempfile::TempDir;

const TENANT: i64 = 1;

async fn create_test_service(config: HierarchyConfig) -> Result<(HierarchyService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = HierarchyService::new(db_path, config).await?;
    Ok((service, temp_dir))
}

/// TELEVISIONS branch of the fixture, built incrementally
async fn create_fixture(config: HierarchyConfig) -> Result<(HierarchyService, TempDir)> {
    let (service, temp_dir) = create_test_service(config).await?;
    service.insert(TENANT, "1", "ELECTRONICS", None).await?;
    service
        .insert(TENANT, "2", "TELEVISIONS", Some("1"))
        .await?;
    service.insert(TENANT, "3", "TUBE", Some("2")).await?;
    service.insert(TENANT, "4", "LCD", Some("2")).await?;
    Ok((service, temp_dir))
}

async fn labels(service: &HierarchyService) -> Result<Vec<String>> {
    Ok(service
        .list_tree(TENANT)
        .await?
        .iter()
        .map(|e| format!("{}{}", e.label(), e.node.bounds))
        .collect())
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig::default()).await?;
    let before = labels(&service).await?;

    let err = service
        .insert(TENANT, "3", "ANOTHER TUBE", Some("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::DuplicateId { tenant: 1, ref id } if id == "3"));
    assert_eq!(labels(&service).await?, before);

    // The same id is free in another tenant
    service.insert(2, "3", "TUBE", None).await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_parent_is_rejected() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig::default()).await?;
    let before = labels(&service).await?;

    let err = service
        .insert(TENANT, "5", "PLASMA", Some("99"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, HierarchyError::ParentNotFound { tenant: 1, ref parent_id } if parent_id == "99")
    );
    assert_eq!(labels(&service).await?, before);

    // A parent from another tenant does not count
    let err = service
        .insert(2, "5", "PLASMA", Some("2"))
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::ParentNotFound { tenant: 2, .. }));
    Ok(())
}

#[tokio::test]
async fn test_not_found_errors() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig::default()).await?;

    for err in [
        service.delete(TENANT, "404").await.unwrap_err(),
        service.update(TENANT, "404", "X").await.unwrap_err(),
        service.get_node(TENANT, "404").await.unwrap_err(),
        service.get_parents(TENANT, "404").await.unwrap_err(),
        service.get_children(TENANT, "404").await.unwrap_err(),
        service.get_descendants(TENANT, "404").await.unwrap_err(),
    ] {
        assert!(
            matches!(err, HierarchyError::NotFound { tenant: 1, .. }),
            "unexpected error: {}",
            err
        );
        assert!(!err.is_retryable());
    }
    Ok(())
}

#[tokio::test]
async fn test_invalid_ids_are_rejected() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig {
        max_id_len: 8,
        ..Default::default()
    })
    .await?;
    let before = labels(&service).await?;

    for id in ["", " 5", "5\t", "123456789"] {
        let err = service
            .insert(TENANT, id, "BAD", Some("1"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, HierarchyError::InvalidArgument(_)),
            "id {:?} gave {}",
            id,
            err
        );
    }
    let err = service
        .insert(TENANT, "5", "BAD", Some(" 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::InvalidArgument(_)));

    assert!(matches!(
        service.delete(TENANT, "").await.unwrap_err(),
        HierarchyError::InvalidArgument(_)
    ));
    assert_eq!(labels(&service).await?, before);
    Ok(())
}

#[tokio::test]
async fn test_move_is_unsupported() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig::default()).await?;
    let before = labels(&service).await?;

    let err = service
        .move_node(TENANT, "3", Some("1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HierarchyError::Unsupported {
            operation: "move",
            ..
        }
    ));
    assert_eq!(labels(&service).await?, before);
    Ok(())
}

#[tokio::test]
async fn test_unindexed_tenant_blocks_structural_mutations() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig::default()).await?;
    service
        .import_legacy(TENANT, vec![LegacyNode::new("5", "PLASMA", Some("2"))])
        .await?;

    let err = service
        .insert(TENANT, "6", "OLED", Some("2"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HierarchyError::NotIndexed {
            tenant: 1,
            unindexed: 1
        }
    ));
    assert!(matches!(
        service.delete(TENANT, "3").await.unwrap_err(),
        HierarchyError::NotIndexed { .. }
    ));

    // Rebuild adopts the imported row as the last child of TELEVISIONS
    service.rebuild(TENANT).await?;
    service.insert(TENANT, "6", "OLED", Some("2")).await?;
    let children: Vec<String> = service
        .get_children(TENANT, "2")
        .await?
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert_eq!(children, vec!["TUBE", "LCD", "PLASMA", "OLED"]);
    Ok(())
}

#[tokio::test]
async fn test_import_is_all_or_nothing() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig::default()).await?;

    let err = service
        .import_legacy(
            TENANT,
            vec![
                LegacyNode::new("5", "PLASMA", Some("2")),
                LegacyNode::new("2", "TELEVISIONS AGAIN", Some("1")),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::DuplicateId { .. }));

    // PLASMA was rolled back with the rest of the batch
    assert_eq!(service.list_tree(TENANT).await?.len(), 4);

    let err = service
        .import_legacy(
            TENANT,
            vec![
                LegacyNode::new("7", "A", None),
                LegacyNode::new("7", "B", None),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::DuplicateId { .. }));
    Ok(())
}

#[tokio::test]
async fn test_rebuild_rejects_orphans_without_writing() -> Result<()> {
    let (service, _temp_dir) = create_test_service(HierarchyConfig::default()).await?;
    service
        .import_legacy(
            TENANT,
            vec![
                LegacyNode::new("1", "ROOT", None),
                LegacyNode::new("2", "LOST", Some("ghost")),
            ],
        )
        .await?;

    let err = service.rebuild(TENANT).await.unwrap_err();
    assert!(err.is_corruption());
    assert!(err.to_string().contains("ghost"));

    // No bounds were written
    assert!(matches!(
        service.list_tree(TENANT).await.unwrap_err(),
        HierarchyError::NotIndexed {
            unindexed: 2,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_rebuild_rejects_cycles() -> Result<()> {
    let (service, _temp_dir) = create_test_service(HierarchyConfig::default()).await?;
    service
        .import_legacy(
            TENANT,
            vec![
                LegacyNode::new("a", "A", Some("b")),
                LegacyNode::new("b", "B", Some("a")),
            ],
        )
        .await?;

    let err = service.rebuild(TENANT).await.unwrap_err();
    assert!(matches!(err, HierarchyError::CorruptionDetected { tenant: 1, .. }));
    Ok(())
}

#[tokio::test]
async fn test_verify_detects_damaged_bounds_and_rebuild_repairs() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig::default()).await?;

    // Stretch TUBE over LCD: partial overlap
    let conn = service.database().connect_with_timeout().await?;
    conn.execute(
        "UPDATE tree_nodes SET rgt = 6 WHERE tenant = ? AND id = '3'",
        [TENANT],
    )
    .await?;

    let err = service.verify(TENANT).await.unwrap_err();
    assert!(err.is_corruption());

    service.rebuild(TENANT).await?;
    assert_eq!(service.verify(TENANT).await?, 4);
    Ok(())
}

#[tokio::test]
async fn test_verify_after_mutation_rejects_corrupt_tenant() -> Result<()> {
    let (service, _temp_dir) = create_fixture(HierarchyConfig {
        verify_after_mutation: true,
        ..Default::default()
    })
    .await?;

    // Point LCD at the wrong parent; bounds still nest correctly
    let conn = service.database().connect_with_timeout().await?;
    conn.execute(
        "UPDATE tree_nodes SET parent_id = '1' WHERE tenant = ? AND id = '4'",
        [TENANT],
    )
    .await?;
    let before = labels(&service).await?;

    let err = service
        .insert(TENANT, "5", "PLASMA", Some("2"))
        .await
        .unwrap_err();
    assert!(err.is_corruption());

    // The insert was rolled back
    assert_eq!(labels(&service).await?, before);
    assert!(matches!(
        service.get_node(TENANT, "5").await.unwrap_err(),
        HierarchyError::NotFound { .. }
    ));
    Ok(())
}
