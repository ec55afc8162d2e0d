//! Runs the indirect dispatch patch kernel against a closed stream.
#[path = "util.rs"]
mod util;

use tilejob::command::{DispatchBindings, DispatchRequest, IndirectDispatchRequest};
use tilejob::encoder::IndirectDispatch;
use tilejob::job::{pack_invocation, JobField, JobType};
use tilejob::pool::{GpuAddress, PoolError, ScratchPool};
use tilejob::profile::ArchitectureProfile;
use tilejob::run::Execution;
use tilejob::{Device, EncodeError, Pool};

const LOCAL: [u32; 3] = [8, 8, 1];

struct Indirect {
    counts: [u32; 3],
    sysvals: [GpuAddress; 3],
    jobs: IndirectDispatch,
}

fn bindings(pool: &mut Pool) -> DispatchBindings {
    // Some user kernel, the host does not execute it.
    let state = pool.upload(&[0; 64], 64).unwrap();
    DispatchBindings {
        renderer_state: state,
        ..DispatchBindings::default()
    }
}

/// Encode one indirect dispatch per entry of `counts` and run the stream.
fn run(device: &Device, pool: &mut Pool, all_counts: &[[u32; 3]]) -> Vec<Indirect> {
    let bindings = bindings(pool);

    let mut inputs = vec![];
    for &counts in all_counts {
        let indirect = pool.upload(bytemuck::cast_slice(&counts), 4).unwrap();
        let sysvals = [
            pool.upload(&[0xff; 4], 4).unwrap(),
            GpuAddress::NULL,
            pool.upload(&[0xff; 4], 4).unwrap(),
        ];
        inputs.push((counts, indirect, sysvals));
    }

    let mut encoder = device.encoder(&mut *pool);
    let mut dispatches = vec![];
    for &(counts, indirect, sysvals) in &inputs {
        let jobs = encoder
            .encode_indirect_dispatch(&IndirectDispatchRequest {
                bindings,
                local_size: LOCAL,
                indirect,
                num_workgroups: sysvals,
            })
            .unwrap();

        dispatches.push(Indirect {
            counts,
            sysvals,
            jobs,
        });
    }

    let closed = encoder.finish().unwrap();
    let head = closed.head.unwrap();

    let outcomes = Execution::new(device.registry(), &mut *pool, head)
        .run_to_end()
        .unwrap();
    assert_eq!(outcomes.len(), 2 * all_counts.len());

    for (pair, outcomes) in dispatches.iter().zip(outcomes.chunks(2)) {
        assert_eq!(outcomes[0].address, pair.jobs.patch.address());
        assert!(outcomes[0].executed, "patch kernel runs on the host");
        assert_eq!(outcomes[1].address, pair.jobs.dispatch.address());
        assert!(!outcomes[1].executed);
    }

    dispatches
}

fn check_patched(device: &Device, pool: &Pool, dispatches: &[Indirect]) {
    let bits = device.profile().invocation_field_bits;
    for dispatch in dispatches {
        let record = util::job(pool, dispatch.jobs.dispatch);
        assert_eq!(record.job_type(), JobType::Compute);

        let expected = pack_invocation(LOCAL, dispatch.counts, bits).unwrap();
        assert_eq!(record.invocation().unwrap(), expected);
        assert_eq!(record.invocation().unwrap().workgroups(), dispatch.counts);

        assert_eq!(pool.read_u32(dispatch.sysvals[0]).unwrap(), dispatch.counts[0]);
        assert_eq!(pool.read_u32(dispatch.sysvals[2]).unwrap(), dispatch.counts[2]);
    }
}

#[test]
fn patch_matches_host_packing() {
    util::init_logging();

    for profile in [ArchitectureProfile::BIFROST, ArchitectureProfile::MIDGARD] {
        let (device, mut pool) = util::device(profile);
        let counts = [[3, 5, 2], [1, 1, 1], [17, 1, 4096], [255, 256, 3]];
        let dispatches = run(&device, &mut pool, &counts);
        check_patched(&device, &pool, &dispatches);
    }
}

#[test]
fn patch_wide_counts() {
    let profile = ArchitectureProfile {
        invocation_field_bits: 64,
        ..ArchitectureProfile::BIFROST
    };

    let (device, mut pool) = util::device(profile);
    let counts = [[1 << 16, 1 << 16, 1 << 16], [1 << 16, 1, 65535]];
    let dispatches = run(&device, &mut pool, &counts);
    check_patched(&device, &pool, &dispatches);
}

#[test]
fn zero_dispatch_becomes_null() {
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);

    let counts = [[3, 0, 2]];
    let bindings = bindings(&mut pool);
    let indirect = pool.upload(bytemuck::cast_slice(&counts[0]), 4).unwrap();
    let sysval = pool.upload(&[0xff; 4], 4).unwrap();

    let mut encoder = device.encoder(&mut pool);
    let jobs = encoder
        .encode_indirect_dispatch(&IndirectDispatchRequest {
            bindings,
            local_size: LOCAL,
            indirect,
            num_workgroups: [sysval, GpuAddress::NULL, GpuAddress::NULL],
        })
        .unwrap();
    let closed = encoder.finish().unwrap();

    let invocation_at = JobField::Invocations
        .address_in(JobType::Compute, jobs.dispatch.address())
        .unwrap();
    let before = pool.read_bytes(invocation_at, 16).unwrap();

    let outcomes = Execution::new(device.registry(), &mut pool, closed.head.unwrap())
        .run_to_end()
        .unwrap();

    assert_eq!(outcomes[1].ty, JobType::Null);
    assert_eq!(util::job(&pool, jobs.dispatch).job_type(), JobType::Null);
    assert_eq!(pool.read_bytes(invocation_at, 16).unwrap(), before);
    // Counts are made visible even for an empty grid.
    assert_eq!(pool.read_u32(sysval).unwrap(), 3);
}

#[test]
fn patch_precedes_dispatch() {
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);
    let bindings = bindings(&mut pool);
    let indirect = pool.upload(&[0; 12], 4).unwrap();

    let mut encoder = device.encoder(&mut pool);
    let direct = encoder
        .encode_dispatch(&DispatchRequest {
            bindings,
            local_size: LOCAL,
            workgroups: [2, 2, 1],
        })
        .unwrap()
        .unwrap();

    let jobs = encoder
        .encode_indirect_dispatch(&IndirectDispatchRequest {
            bindings,
            local_size: LOCAL,
            indirect,
            num_workgroups: [GpuAddress::NULL; 3],
        })
        .unwrap();

    assert_eq!(jobs.patch.index(), direct.index() + 1);
    assert_eq!(jobs.dispatch.index(), jobs.patch.index() + 1);

    let stream = encoder.stream();
    let patch = stream.record(jobs.patch).unwrap();
    let dispatch = stream.record(jobs.dispatch).unwrap();
    assert_eq!(patch.dependencies()[1], direct.index());
    assert_eq!(dispatch.dependencies()[1], jobs.patch.index());

    // The placeholder grid is a single workgroup.
    assert_eq!(dispatch.invocation().unwrap().decode(), (LOCAL, [1, 1, 1]));
    encoder.finish().unwrap();
}

#[test]
fn empty_direct_dispatch_is_skipped() {
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);
    let bindings = bindings(&mut pool);

    let mut encoder = device.encoder(&mut pool);
    let none = encoder
        .encode_dispatch(&DispatchRequest {
            bindings,
            local_size: LOCAL,
            workgroups: [4, 0, 1],
        })
        .unwrap();

    assert!(none.is_none());
    assert!(encoder.stream().is_empty());

    let missing = encoder.encode_dispatch(&DispatchRequest {
        bindings: DispatchBindings::default(),
        local_size: LOCAL,
        workgroups: [1, 1, 1],
    });
    assert_eq!(missing, Err(EncodeError::MissingRendererState));
}

#[test]
fn out_of_memory_leaves_stream_closable() {
    util::init_logging();
    let (device, _) = util::device(ArchitectureProfile::BIFROST);

    // Room for the thread storage and the dispatch job, not for the patch parameters.
    let mut small = Pool::with_chunk_size(256).with_limit(256);
    let mut encoder = device.encoder(&mut small);
    let request = IndirectDispatchRequest {
        bindings: DispatchBindings {
            renderer_state: GpuAddress(0x1000),
            ..DispatchBindings::default()
        },
        local_size: LOCAL,
        indirect: GpuAddress(0x2000),
        num_workgroups: [GpuAddress::NULL; 3],
    };

    for _ in 0..2 {
        let err = encoder.encode_indirect_dispatch(&request).unwrap_err();
        assert!(
            matches!(err, EncodeError::Pool(PoolError::OutOfMemory { .. })),
            "{:?}",
            err
        );
        assert!(encoder.stream().is_empty());
    }

    let closed = encoder.finish().unwrap();
    assert_eq!(closed.head, None);
    assert!(closed.jobs.is_empty());
}
