//! Invocation packing of dispatch dimensions.
use tilejob::job::{pack_invocation, JobField, JobRecord, JobType, LayoutError, PackError};

#[test]
fn pack_small() {
    let invocation = pack_invocation([5, 3, 9], [1, 1, 1], 32).unwrap();

    // 4, 2 and 8 need 3, 2 and 4 bits.
    assert_eq!(invocation.shifts, [3, 5, 9, 9, 9]);
    assert_eq!(invocation.split, 9);
    assert_eq!(invocation.packed, 4 | (2 << 3) | (8 << 5));
    assert_eq!(invocation.decode(), ([5, 3, 9], [1, 1, 1]));
}

#[test]
fn pack_small_grid() {
    let invocation = pack_invocation([16, 16, 1], [5, 3, 9], 32).unwrap();

    // 15, 15, 0 for the local size, then 4, 2 and 8.
    assert_eq!(invocation.shifts, [4, 8, 8, 11, 13]);
    assert_eq!(invocation.split, 8);
    assert_eq!(invocation.decode(), ([16, 16, 1], [5, 3, 9]));
    assert_eq!(invocation.workgroups(), [5, 3, 9]);
}

#[test]
fn round_trip_joint_counts() {
    let local = [16, 16, 1];
    let counts = [1, 2, 3, 255, 256, 257, 65535, 65536];
    for x in counts {
        for y in counts {
            for z in counts {
                let invocation = pack_invocation(local, [x, y, z], 64).unwrap();
                assert_eq!(invocation.decode(), (local, [x, y, z]));
            }
        }
    }
}

#[test]
fn round_trip_every_count() {
    let local = [5, 3, 9];
    for count in 1..=(1u32 << 16) {
        for dim in 0..3 {
            let mut groups = [1; 3];
            groups[dim] = count;

            let invocation = pack_invocation(local, groups, 32).unwrap();
            assert_eq!(invocation.decode(), (local, groups), "count {} in {}", count, dim);
        }
    }
}

#[test]
fn single_item_needs_no_bits() {
    let invocation = pack_invocation([1, 1, 1], [1, 1, 1], 32).unwrap();
    assert_eq!(invocation.packed, 0);
    assert_eq!(invocation.shifts, [0; 5]);
}

#[test]
fn rejects_zero_and_overflow() {
    assert_eq!(
        pack_invocation([0, 1, 1], [1, 1, 1], 32),
        Err(PackError::ZeroSize)
    );

    // 16 bits for each workgroup dimension and 4 for the local size.
    let wide = [1 << 16, 1 << 16, 1 << 16];
    assert_eq!(
        pack_invocation([16, 1, 1], wide, 32),
        Err(PackError::Overflow {
            bits: 52,
            available: 32
        })
    );

    assert!(pack_invocation([16, 1, 1], wide, 64).is_ok());
}

#[test]
fn stored_in_record() {
    let invocation = pack_invocation([16, 16, 1], [7, 3, 2], 32).unwrap();
    let mut record = JobRecord::new(JobType::Compute);
    record.set_invocation(&invocation).unwrap();

    assert_eq!(record.invocation().unwrap(), invocation);
    assert_eq!(
        record.read(JobField::InvocationShifts).unwrap(),
        u64::from(invocation.shift_word())
    );
    assert_eq!(
        record.read(JobField::ThreadGroupSplit).unwrap(),
        u64::from(invocation.split)
    );

    let null = JobRecord::new(JobType::Null);
    assert_eq!(
        null.invocation(),
        Err(LayoutError::NoSuchField {
            ty: JobType::Null,
            field: JobField::Invocations,
        })
    );
}
