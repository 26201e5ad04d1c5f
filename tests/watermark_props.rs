//! Property tests for watermark handling on an installed index instance

use proptest::prelude::*;

use proxima_vindex::core::{IndexParameter, VectorWithId, WalMutation};
use proxima_vindex::index::IndexInstance;
use proxima_vindex::{BuiltinIndexFactory, IndexFactory, MetricType};

fn instance(watermark: u64) -> IndexInstance {
    let parameter = IndexParameter::Flat {
        dimension: 2,
        metric: MetricType::L2,
    };
    let index = BuiltinIndexFactory.create(&parameter).expect("flat index");
    IndexInstance::new(index, watermark)
}

proptest! {
    #[test]
    fn watermark_never_moves_backwards(start in 0u64..50, log_ids in prop::collection::vec(0u64..200, 1..64)) {
        let instance = instance(start);
        let mut expected = start;
        for log_id in log_ids {
            let mutation = WalMutation::Upsert(vec![VectorWithId::new(log_id, vec![log_id as f32, 0.0])]);
            let applied = instance.apply(log_id, &mutation).expect("apply");
            prop_assert_eq!(applied, log_id > expected);
            expected = expected.max(log_id);
            prop_assert_eq!(instance.watermark(), expected);
        }
    }

    #[test]
    fn stale_entries_leave_index_untouched(watermark in 10u64..100, stale in 0u64..10) {
        let instance = instance(watermark);
        let mutation = WalMutation::Upsert(vec![VectorWithId::new(1, vec![1.0, 1.0])]);
        prop_assert!(!instance.apply(stale, &mutation).expect("apply"));
        prop_assert_eq!(instance.index().count(), 0);
        prop_assert_eq!(instance.watermark(), watermark);
    }
}
