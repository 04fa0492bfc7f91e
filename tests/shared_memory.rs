// Shared memory backend tests for Linux
// Run with: cargo test --test shared_memory -- --nocapture

mod common;

#[cfg(target_os = "linux")]
mod linux_tests {
    use super::common::{shm_exists, unique_name};
    use dmxp_eventring::Core::{
        attach_shared_memory, create_shared_memory, unlink_shared_memory, RawHandle,
    };

    #[test]
    fn test_create_shared_memory() {
        let name = unique_name("shm_create");
        let size = 4096;
        let shm = create_shared_memory(size, &name).unwrap();

        assert_eq!(shm.size(), size);
        assert_eq!(shm.name(), name);
        assert!(!shm.as_ptr().is_null());
        assert!(shm_exists(&name));

        unsafe {
            let slice = std::slice::from_raw_parts_mut(shm.as_ptr(), size);
            slice[0] = 0x42;
            assert_eq!(slice[0], 0x42);
        }
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    fn test_create_is_exclusive() {
        let name = unique_name("shm_excl");
        let _shm = create_shared_memory(1024, &name).unwrap();

        let err = create_shared_memory(1024, &name).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "a/b", "..", "x".repeat(80).as_str()] {
            let err = create_shared_memory(1024, name).unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput, "name {:?}", name);
        }
    }

    #[test]
    fn test_attach_sees_writes() {
        let name = unique_name("shm_attach");
        let size = 8192;
        let shm = create_shared_memory(size, &name).unwrap();
        let other = attach_shared_memory(&name, size).unwrap();
        assert_eq!(other.size(), size);

        unsafe {
            let a = std::slice::from_raw_parts_mut(shm.as_ptr(), size);
            let b = std::slice::from_raw_parts(other.as_ptr(), size);
            for i in 0..100 {
                a[i] = (i % 256) as u8;
            }
            for i in 0..100 {
                assert_eq!(b[i], (i % 256) as u8);
            }
        }
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    fn test_attach_too_small() {
        let name = unique_name("shm_small");
        let _shm = create_shared_memory(1024, &name).unwrap();
        let err = attach_shared_memory(&name, 4096).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    fn test_attach_missing() {
        let err = attach_shared_memory(&unique_name("shm_missing"), 16).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_raw_handle() {
        let name = unique_name("shm_handle");
        let shm = create_shared_memory(4096, &name).unwrap();
        match shm.raw_handle() {
            RawHandle::Fd(fd) => assert!(fd > 0, "File descriptor should be positive"),
        }
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    fn test_mmap_zero_initialized() {
        let name = unique_name("shm_zero");
        let size = 1024;
        let shm = create_shared_memory(size, &name).unwrap();

        unsafe {
            let slice = std::slice::from_raw_parts(shm.as_ptr(), size);
            assert!(slice.iter().all(|&b| b == 0), "Mmap'd memory should be zero-initialized");
        }
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    fn test_unlink_twice_is_ok() {
        let name = unique_name("shm_unlink");
        let shm = create_shared_memory(1024, &name).unwrap();
        unlink_shared_memory(&name).unwrap();
        unlink_shared_memory(&name).unwrap();
        assert!(!shm_exists(&name));

        // The mapping outlives the name.
        unsafe {
            *shm.as_ptr() = 7;
            assert_eq!(*shm.as_ptr(), 7);
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod non_linux_tests {
    use dmxp_eventring::Core::{attach_shared_memory, create_shared_memory};

    #[test]
    fn test_unsupported_platform() {
        let err = create_shared_memory(4096, "unsupported").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
        assert!(attach_shared_memory("unsupported", 4096).is_err());
    }
}
