//! Filtered search, point query and scan behaviour through the manager's reader

mod common;

use anyhow::Result;
use serde_json::json;

use common::{flat, ivf, point, tagged, TestCluster};
use proxima_vindex::core::{KeyRange, WalMutation};
use proxima_vindex::query::{FieldCondition, QueryParameter, ScanContext, SearchStrategy};
use proxima_vindex::storage::VectorCodec;
use proxima_vindex::{FilterExpr, FilterMode, SearchParameter, VectorIndexError};

fn ids(hits: &[proxima_vindex::core::VectorWithDistance]) -> Vec<u64> {
    hits.iter().map(|h| h.id()).collect()
}

#[tokio::test]
async fn test_filter_strategies_agree_on_flat_index() -> Result<()> {
    let cluster = TestCluster::new();
    let region = cluster.add_region(1, 0, 5_000, flat(2));
    cluster.commit(&region, 1, &WalMutation::Upsert((0..1_000).map(tagged).collect()));
    let manager = cluster.manager();
    manager.init().await?;
    let reader = manager.reader(1).await?;

    let queries = vec![point(5), point(333), point(998)];
    let bucket3 = FilterExpr::equals("bucket", 3);

    let pre = reader
        .batch_search(&queries, &SearchParameter::top_n(10).with_scalar_filter(bucket3.clone(), FilterMode::Pre))
        .await?;
    let post = reader
        .batch_search(&queries, &SearchParameter::top_n(10).with_scalar_filter(bucket3, FilterMode::Post))
        .await?;
    let by_ids = reader
        .batch_search(
            &queries,
            &SearchParameter::top_n(10).with_vector_ids((0..1_000).filter(|id| id % 10 == 3).collect()),
        )
        .await?;

    assert_eq!(pre.timing.strategy, SearchStrategy::ScalarPreFilter);
    assert_eq!(post.timing.strategy, SearchStrategy::ScalarPostFilter);
    assert_eq!(by_ids.timing.strategy, SearchStrategy::VectorIdPreFilter);

    for q in 0..queries.len() {
        assert_eq!(pre.results[q].len(), 10);
        assert!(ids(&pre.results[q]).iter().all(|id| id % 10 == 3));
        assert_eq!(ids(&pre.results[q]), ids(&post.results[q]));
        assert_eq!(ids(&pre.results[q]), ids(&by_ids.results[q]));
        let pre_d: Vec<f32> = pre.results[q].iter().map(|h| h.distance).collect();
        let post_d: Vec<f32> = post.results[q].iter().map(|h| h.distance).collect();
        assert_eq!(pre_d, post_d);
    }
    Ok(())
}

#[tokio::test]
async fn test_id_restriction_returns_only_listed_ids() -> Result<()> {
    let cluster = TestCluster::new();
    let region = cluster.add_region(1, 0, 10_000, ivf(2));
    cluster.commit(&region, 1, &WalMutation::Upsert((0..10_000).map(tagged).collect()));
    let manager = cluster.manager();
    manager.init().await?;

    let reader = manager.reader(1).await?;
    let param = SearchParameter::top_n(10).with_vector_ids(vec![9_999, 5, 777]);
    let result = reader.batch_search(&[point(0)], &param).await?;

    // Exact distances, closest first
    assert_eq!(ids(&result.results[0]), vec![5, 777, 9_999]);
    Ok(())
}

#[tokio::test]
async fn test_table_filter_matches_brute_force() -> Result<()> {
    let cluster = TestCluster::new();
    let region = cluster.add_region(1, 0, 1_000, flat(2));
    cluster.commit(&region, 1, &WalMutation::Upsert((0..500).map(tagged).collect()));
    let manager = cluster.manager();
    manager.init().await?;
    let reader = manager.reader(1).await?;

    let filter = FilterExpr::field("score", FieldCondition::GreaterThanOrEqual(json!(95)));
    let result = reader
        .batch_search(&[point(0)], &SearchParameter::top_n(8).with_table_filter(filter))
        .await?;
    assert_eq!(result.timing.strategy, SearchStrategy::TableCoprocessor);

    // score = id % 100, so ids 95..99, 195..199, ... qualify; nearest to 0 first
    let expected: Vec<u64> = (0..500u64).filter(|id| id % 100 >= 95).take(8).collect();
    assert_eq!(ids(&result.results[0]), expected);
    Ok(())
}

#[tokio::test]
async fn test_results_stay_inside_region_range() -> Result<()> {
    let cluster = TestCluster::new();
    let left = cluster.add_region(1, 0, 500, flat(2));
    let right = cluster.add_region(2, 500, 1_000, flat(2));
    cluster.commit(&left, 1, &WalMutation::Upsert((0..500).map(tagged).collect()));
    cluster.commit(&right, 1, &WalMutation::Upsert((500..1_000).map(tagged).collect()));
    let manager = cluster.manager();
    manager.init().await?;

    let reader = manager.reader(2).await?;
    // Query sits in the left region; every hit must still come from the right one
    let result = reader.batch_search(&[point(10)], &SearchParameter::top_n(20)).await?;
    assert_eq!(result.results[0].len(), 20);
    assert!(ids(&result.results[0]).iter().all(|id| (500..1_000).contains(id)));
    assert_eq!(result.results[0][0].id(), 500);
    Ok(())
}

#[tokio::test]
async fn test_search_rejects_bad_requests() -> Result<()> {
    let cluster = TestCluster::new();
    let region = cluster.add_region(1, 0, 100, flat(2));
    cluster.commit(&region, 1, &WalMutation::Upsert((0..10).map(tagged).collect()));
    let manager = cluster.manager();
    manager.init().await?;
    let reader = manager.reader(1).await?;

    let too_many = SearchParameter::top_n(manager.config().search.max_top_n + 1);
    assert!(matches!(
        reader.batch_search(&[point(1)], &too_many).await,
        Err(VectorIndexError::InvalidArgument(_))
    ));

    let wrong_dim = reader.batch_search(&[vec![1.0, 2.0, 3.0]], &SearchParameter::top_n(3)).await;
    assert!(matches!(wrong_dim, Err(VectorIndexError::InvalidArgument(_))));
    Ok(())
}

#[tokio::test]
async fn test_point_query_and_scan_pages() -> Result<()> {
    let cluster = TestCluster::new();
    let region = cluster.add_region(1, 0, 100, flat(2));
    cluster.commit(&region, 1, &WalMutation::Upsert((0..40).map(tagged).collect()));
    let manager = cluster.manager();
    manager.init().await?;
    let reader = manager.reader(1).await?;

    let param = QueryParameter {
        with_vector_data: true,
        with_scalar_data: true,
        ..Default::default()
    };
    let outcomes = reader.batch_query(&[3, 77], &param).await?;
    let found = outcomes[0].found().expect("id 3 stored");
    assert_eq!(found.vector.as_deref(), Some(point(3).as_slice()));
    assert_eq!(found.scalar_data.as_ref().and_then(|s| s.get("bucket")), Some(&json!(3)));
    assert!(outcomes[1].found().is_none());

    let mut seen = Vec::new();
    let mut ctx = ScanContext::new(0, 15);
    ctx.scalar_filter = Some(FilterExpr::field("bucket", FieldCondition::In(vec![json!(1), json!(2)])));
    loop {
        let page = reader.scan_query(&ctx).await?;
        seen.extend(page.vectors.iter().map(|v| v.id));
        match page.next_id {
            Some(next) => ctx.start_id = next,
            None => break,
        }
    }
    let expected: Vec<u64> = (0..40).filter(|id| id % 10 == 1 || id % 10 == 2).collect();
    assert_eq!(seen, expected);

    let all = KeyRange::new(
        VectorCodec::encode_vector_key(1, 0),
        VectorCodec::encode_vector_key(1, 1_000),
    );
    assert_eq!(reader.count(&all).await?, 40);
    assert_eq!(reader.get_border_id(&all, true).await?, 0);
    assert_eq!(reader.get_border_id(&all, false).await?, 39);

    let metrics = reader.get_region_metrics().await?;
    assert_eq!(metrics.vector_count, 40);
    assert_eq!(metrics.min_id, Some(0));
    assert_eq!(metrics.max_id, Some(39));
    assert_eq!(metrics.watermark, 1);
    Ok(())
}
