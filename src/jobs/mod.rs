//! Pipeline job runner.
//!
//! Each job is one pipeline run by a leader process (the direct child
//! of [`run`]) that forks one grandchild per stage; the leader's pid is
//! the job's process group. The parent tracks jobs in an append-only
//! table and observes their fate through SIGCHLD/SIGABRT: handlers do
//! nothing but look up the job by pid and flip its status atomically —
//! no allocation, no locks, no reentrant I/O. Everything else (linking,
//! unlinking, draining captured output, reaping) happens on the main
//! control flow.

pub mod leader;

use std::cell::{Cell, UnsafeCell};
use std::io::{self, Write};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};

use crate::store::Store;
use crate::syntax::Pipeline;
use crate::sys::errno;
use crate::sys::syscalls::{
    self, CLD_DUMPED, CLD_EXITED, CLD_KILLED, SA_SIGINFO, SIG_BLOCK, SIG_SETMASK, SIGABRT, SIGCHLD,
    SIGKILL, STDOUT_FILENO, c_int, c_void, pid_t, sigaction_fn, sigaction_t, siginfo_t, sigset_t,
};
use crate::{log_debug, log_error};

// ── Job status ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    New = 0,
    Running = 1,
    Completed = 2,
    Aborted = 3,
    Canceled = 4,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::New,
            1 => Status::Running,
            2 => Status::Completed,
            3 => Status::Aborted,
            _ => Status::Canceled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Aborted | Status::Canceled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Aborted => "aborted",
            Status::Canceled => "canceled",
        }
    }
}

// ── Wait status decoding ────────────────────────────────────────────────────

/// A raw status word from `waitpid`.
#[derive(Debug, Clone, Copy)]
pub struct WaitStatus {
    raw: c_int,
}

impl WaitStatus {
    pub fn new(raw: c_int) -> Self {
        Self { raw }
    }

    /// The exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        if (self.raw & 0x7f) == 0 {
            Some((self.raw >> 8) & 0xff)
        } else {
            None
        }
    }

    /// The terminating signal, if the process died by one.
    pub fn signal(&self) -> Option<i32> {
        let sig = self.raw & 0x7f;
        if sig != 0 && sig != 0x7f { Some(sig) } else { None }
    }
}

// ── The job table ───────────────────────────────────────────────────────────

/// One tracked pipeline run.
///
/// `status` and `canceled` are the only fields signal handlers touch;
/// the capture buffer and fd are main-flow-only and live behind
/// `UnsafeCell`/`Cell` so no `&mut Job` ever exists while a handler
/// might be walking the table.
struct Job {
    job_id: i32,
    pgid: pid_t,
    status: AtomicU8,
    canceled: AtomicBool,
    pipeline: Pipeline,
    capture_fd: Cell<c_int>,
    captured: UnsafeCell<Vec<u8>>,
    next: AtomicPtr<Job>,
}

impl Drop for Job {
    fn drop(&mut self) {
        let fd = self.capture_fd.get();
        if fd >= 0 {
            unsafe {
                syscalls::close(fd);
            }
        }
    }
}

/// Head of the append-only job list. Jobs are leaked boxes while
/// linked; only the main flow links and unlinks.
static JOB_LIST: AtomicPtr<Job> = AtomicPtr::new(ptr::null_mut());

/// Bumped by every handler run; `pause` sleeps until it moves.
static SIG_GEN: AtomicUsize = AtomicUsize::new(0);

static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn find_by_pgid(pgid: pid_t) -> *mut Job {
    let mut cur = JOB_LIST.load(Ordering::Acquire);
    unsafe {
        while !cur.is_null() {
            if (*cur).pgid == pgid {
                return cur;
            }
            cur = (*cur).next.load(Ordering::Acquire);
        }
    }
    ptr::null_mut()
}

fn find_by_id(job_id: i32) -> *mut Job {
    let mut cur = JOB_LIST.load(Ordering::Acquire);
    unsafe {
        while !cur.is_null() {
            if (*cur).job_id == job_id {
                return cur;
            }
            cur = (*cur).next.load(Ordering::Acquire);
        }
    }
    ptr::null_mut()
}

fn next_job_id() -> i32 {
    let mut max = -1;
    let mut cur = JOB_LIST.load(Ordering::Acquire);
    unsafe {
        while !cur.is_null() {
            max = max.max((*cur).job_id);
            cur = (*cur).next.load(Ordering::Acquire);
        }
    }
    max + 1
}

fn link_job(job: *mut Job) {
    let mut slot = &JOB_LIST;
    loop {
        let cur = slot.load(Ordering::Acquire);
        if cur.is_null() {
            slot.store(job, Ordering::Release);
            return;
        }
        slot = unsafe { &(*cur).next };
    }
}

// ── Signal handlers ─────────────────────────────────────────────────────────

/// Move a RUNNING job to the terminal state implied by how its leader
/// died. One-shot: the compare-exchange keeps transitions monotonic.
fn transition(job: *mut Job, status: Status) {
    unsafe {
        let _ = (*job).status.compare_exchange(
            Status::Running as u8,
            status as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

/// Terminal state for a leader killed by `sig`: a SIGKILL death after a
/// cancel request is CANCELED, any other signal is ABORTED.
fn state_for_signal(job: *mut Job, sig: c_int) -> Status {
    unsafe {
        if sig == SIGKILL && (*job).canceled.load(Ordering::Acquire) {
            Status::Canceled
        } else {
            Status::Aborted
        }
    }
}

unsafe extern "C" fn on_sigchld(_sig: c_int, info: *mut siginfo_t, _ctx: *mut c_void) {
    unsafe {
        if !info.is_null() {
            let job = find_by_pgid((*info).si_pid);
            if !job.is_null() {
                match (*info).si_code {
                    CLD_EXITED => transition(job, Status::Completed),
                    CLD_KILLED | CLD_DUMPED => {
                        transition(job, state_for_signal(job, (*info).si_status))
                    }
                    _ => {}
                }
            }
        }
    }
    SIG_GEN.fetch_add(1, Ordering::Release);
}

unsafe extern "C" fn on_sigabrt(_sig: c_int, info: *mut siginfo_t, _ctx: *mut c_void) {
    unsafe {
        if !info.is_null() {
            let job = find_by_pgid((*info).si_pid);
            if !job.is_null() {
                transition(job, Status::Aborted);
            }
        }
    }
    SIG_GEN.fetch_add(1, Ordering::Release);
}

fn install_handler(sig: c_int, handler: sigaction_fn) -> c_int {
    #[cfg(target_os = "linux")]
    let mut act = sigaction_t {
        sa_sigaction: handler as usize,
        sa_mask: sigset_t::empty(),
        sa_flags: SA_SIGINFO,
        sa_restorer: 0,
    };
    #[cfg(target_os = "macos")]
    let mut act = sigaction_t {
        sa_sigaction: handler as usize,
        sa_mask: sigset_t::empty(),
        sa_flags: SA_SIGINFO,
    };
    unsafe {
        syscalls::sigemptyset(&mut act.sa_mask);
        syscalls::sigaction(sig, &act, ptr::null_mut())
    }
}

// ── Capture draining ────────────────────────────────────────────────────────

/// Read the capture pipe to EOF into the job's buffer, then retire the
/// fd. Tolerates partial reads and EINTR. Once the job is terminal
/// every writer has exited, so EOF is guaranteed to arrive.
fn drain_capture(job: *mut Job) {
    unsafe {
        let fd = (*job).capture_fd.get();
        if fd < 0 {
            return;
        }
        let buf = &mut *(*job).captured.get();
        let mut chunk = [0u8; 4096];
        loop {
            let n = syscalls::read(fd, chunk.as_mut_ptr() as *mut c_void, chunk.len());
            if n < 0 {
                if errno::get_errno() == errno::EINTR {
                    continue;
                }
                break;
            }
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n as usize]);
        }
        syscalls::close(fd);
        (*job).capture_fd.set(-1);
    }
}

/// Apply the terminal transition implied by a reaped status word, in
/// case the corresponding SIGCHLD has not been delivered yet.
fn apply_wait_status(job: *mut Job, raw: c_int) {
    let ws = WaitStatus::new(raw);
    if ws.code().is_some() {
        transition(job, Status::Completed);
    } else if let Some(sig) = ws.signal() {
        transition(job, state_for_signal(job, sig));
    }
}

// ── Public operations ───────────────────────────────────────────────────────

/// One-shot setup: install the SIGCHLD/SIGABRT observers. Idempotent.
pub fn init() -> i32 {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return 0;
    }
    if install_handler(SIGCHLD, on_sigchld) < 0 || install_handler(SIGABRT, on_sigabrt) < 0 {
        log_error!("sigaction failed: errno {}", errno::get_errno());
        return -1;
    }
    0
}

/// Start a job running `pipeline`. Returns its job id, or -1 when the
/// pipeline is empty or an OS primitive fails. The job owns the
/// pipeline from here on; `store` is snapshotted into the leader for
/// argument evaluation.
pub fn run(pipeline: Pipeline, store: &Store) -> i32 {
    if pipeline.commands.is_empty() {
        return -1;
    }
    init();

    let job_id = next_job_id();
    let mut capture: [c_int; 2] = [-1, -1];
    if pipeline.capture_output && unsafe { syscalls::pipe(capture.as_mut_ptr()) } != 0 {
        log_error!("pipe failed: errno {}", errno::get_errno());
        return -1;
    }

    // Hold back the interest set until the job is linked, so a leader
    // that dies instantly is still found by the handler.
    let mut mask = sigset_t::empty();
    let mut old = sigset_t::empty();
    unsafe {
        syscalls::sigemptyset(&mut mask);
        syscalls::sigaddset(&mut mask, SIGCHLD);
        syscalls::sigaddset(&mut mask, SIGABRT);
        syscalls::sigprocmask(SIG_BLOCK, &mask, &mut old);
    }

    let pid = unsafe { syscalls::fork() };
    if pid < 0 {
        log_error!("fork failed: errno {}", errno::get_errno());
        unsafe {
            syscalls::sigprocmask(SIG_SETMASK, &old, ptr::null_mut());
            if pipeline.capture_output {
                syscalls::close(capture[0]);
                syscalls::close(capture[1]);
            }
        }
        return -1;
    }

    if pid == 0 {
        // Leader: route stdout into the capture pipe before assembling
        // the stages, then never return.
        unsafe {
            syscalls::sigprocmask(SIG_SETMASK, &old, ptr::null_mut());
            if pipeline.capture_output {
                syscalls::dup2(capture[1], STDOUT_FILENO);
                syscalls::close(capture[0]);
                syscalls::close(capture[1]);
            }
        }
        leader::run(&pipeline, store);
    }

    if pipeline.capture_output {
        unsafe {
            syscalls::close(capture[1]);
        }
    }
    let job = Box::new(Job {
        job_id,
        pgid: pid,
        status: AtomicU8::new(Status::New as u8),
        canceled: AtomicBool::new(false),
        pipeline,
        capture_fd: Cell::new(capture[0]),
        captured: UnsafeCell::new(Vec::new()),
        next: AtomicPtr::new(ptr::null_mut()),
    });
    job.status.store(Status::Running as u8, Ordering::Release);
    link_job(Box::into_raw(job));
    unsafe {
        syscalls::sigprocmask(SIG_SETMASK, &old, ptr::null_mut());
    }
    log_debug!("job {} running as pgid {}", job_id, pid);
    job_id
}

/// Block until the leader of `jobid` is reaped; returns the raw wait
/// status, or -1 for an unknown job or wait failure.
pub fn wait(jobid: i32) -> i32 {
    let job = find_by_id(jobid);
    if job.is_null() {
        return -1;
    }
    // Drain first: EOF arrives exactly when the whole group has exited,
    // and reading is what lets a capture-heavy pipeline finish at all.
    drain_capture(job);
    unsafe {
        let mut status: c_int = 0;
        loop {
            let ret = syscalls::waitpid((*job).pgid, &mut status, 0);
            if ret < 0 {
                if errno::get_errno() == errno::EINTR {
                    continue;
                }
                return -1;
            }
            break;
        }
        apply_wait_status(job, status);
        status
    }
}

/// 0 when the job has reached a terminal state, -1 otherwise (or for an
/// unknown job).
pub fn poll(jobid: i32) -> i32 {
    let job = find_by_id(jobid);
    if job.is_null() {
        return -1;
    }
    unsafe {
        if Status::from_u8((*job).status.load(Ordering::Acquire)).is_terminal() {
            drain_capture(job);
            0
        } else {
            -1
        }
    }
}

/// Request cancellation by SIGKILLing the job's process group. At most
/// one attempt per job; -1 for unknown, terminal, or already-canceled
/// jobs. CANCELED is observed only once the leader's death is reaped.
pub fn cancel(jobid: i32) -> i32 {
    let job = find_by_id(jobid);
    if job.is_null() {
        return -1;
    }
    unsafe {
        let status = Status::from_u8((*job).status.load(Ordering::Acquire));
        if status.is_terminal() || (*job).canceled.load(Ordering::Acquire) {
            return -1;
        }
        // Flag first so the SIGCHLD that follows the kill sees it.
        (*job).canceled.store(true, Ordering::Release);
        if syscalls::killpg((*job).pgid, SIGKILL) != 0 {
            log_error!("killpg({}) failed: errno {}", (*job).pgid, errno::get_errno());
            return -1;
        }
        log_debug!("job {} cancel requested", jobid);
        0
    }
}

/// Remove a terminal job and release everything it owns. -1 when the
/// job is unknown or not yet terminal.
pub fn expunge(jobid: i32) -> i32 {
    unsafe {
        let mut prev: *mut Job = ptr::null_mut();
        let mut cur = JOB_LIST.load(Ordering::Acquire);
        while !cur.is_null() && (*cur).job_id != jobid {
            prev = cur;
            cur = (*cur).next.load(Ordering::Acquire);
        }
        if cur.is_null() {
            return -1;
        }
        if !Status::from_u8((*cur).status.load(Ordering::Acquire)).is_terminal() {
            return -1;
        }
        let next = (*cur).next.load(Ordering::Acquire);
        // Unlink before freeing so a handler can never walk into the
        // dead node.
        if prev.is_null() {
            JOB_LIST.store(next, Ordering::Release);
        } else {
            (*prev).next.store(next, Ordering::Release);
        }
        drop(Box::from_raw(cur));
        log_debug!("job {} expunged", jobid);
        0
    }
}

/// Captured output of a terminal job whose pipeline requested capture.
pub fn get_output(jobid: i32) -> Option<Vec<u8>> {
    let job = find_by_id(jobid);
    if job.is_null() {
        return None;
    }
    unsafe {
        if !Status::from_u8((*job).status.load(Ordering::Acquire)).is_terminal() {
            return None;
        }
        if !(*job).pipeline.capture_output {
            return None;
        }
        drain_capture(job);
        Some((*(*job).captured.get()).clone())
    }
}

/// Print one line per job: `<jobid>\t<pgid>\t<status>\t<pipeline>`.
pub fn show(out: &mut dyn Write) -> io::Result<()> {
    let mut cur = JOB_LIST.load(Ordering::Acquire);
    unsafe {
        while !cur.is_null() {
            let status = Status::from_u8((*cur).status.load(Ordering::Acquire));
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                (*cur).job_id,
                (*cur).pgid,
                status.label(),
                (*cur).pipeline
            )?;
            cur = (*cur).next.load(Ordering::Acquire);
        }
    }
    Ok(())
}

/// Block until some signal of interest (SIGCHLD or SIGABRT) has been
/// handled. The interest set is blocked around the generation check so
/// a signal can never slip between the check and the suspension.
pub fn pause() -> i32 {
    unsafe {
        let generation = SIG_GEN.load(Ordering::Acquire);
        let mut mask = sigset_t::empty();
        let mut old = sigset_t::empty();
        syscalls::sigemptyset(&mut mask);
        syscalls::sigaddset(&mut mask, SIGCHLD);
        syscalls::sigaddset(&mut mask, SIGABRT);
        if syscalls::sigprocmask(SIG_BLOCK, &mask, &mut old) != 0 {
            return -1;
        }
        while SIG_GEN.load(Ordering::Acquire) == generation {
            syscalls::sigsuspend(&old);
        }
        syscalls::sigprocmask(SIG_SETMASK, &old, ptr::null_mut());
        0
    }
}

/// Cancel whatever is still running, wait for it, and free every job.
pub fn fini() -> i32 {
    unsafe {
        let mut cur = JOB_LIST.load(Ordering::Acquire);
        while !cur.is_null() {
            if !Status::from_u8((*cur).status.load(Ordering::Acquire)).is_terminal() {
                if !(*cur).canceled.load(Ordering::Acquire) {
                    (*cur).canceled.store(true, Ordering::Release);
                    syscalls::killpg((*cur).pgid, SIGKILL);
                }
                drain_capture(cur);
                let mut status: c_int = 0;
                loop {
                    let ret = syscalls::waitpid((*cur).pgid, &mut status, 0);
                    if ret < 0 && errno::get_errno() == errno::EINTR {
                        continue;
                    }
                    break;
                }
                apply_wait_status(cur, status);
            } else {
                drain_capture(cur);
            }
            cur = (*cur).next.load(Ordering::Acquire);
        }

        let mut cur = JOB_LIST.swap(ptr::null_mut(), Ordering::AcqRel);
        while !cur.is_null() {
            let next = (*cur).next.load(Ordering::Acquire);
            drop(Box::from_raw(cur));
            cur = next;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_are_exact() {
        assert_eq!(Status::New.label(), "new");
        assert_eq!(Status::Running.label(), "running");
        assert_eq!(Status::Completed.label(), "completed");
        assert_eq!(Status::Aborted.label(), "aborted");
        assert_eq!(Status::Canceled.label(), "canceled");
    }

    #[test]
    fn terminal_states() {
        assert!(!Status::New.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(Status::Completed.is_terminal());
        assert!(Status::Aborted.is_terminal());
        assert!(Status::Canceled.is_terminal());
    }

    #[test]
    fn status_round_trips_through_u8() {
        for s in [
            Status::New,
            Status::Running,
            Status::Completed,
            Status::Aborted,
            Status::Canceled,
        ] {
            assert_eq!(Status::from_u8(s as u8), s);
        }
    }

    #[test]
    fn wait_status_decodes_normal_exit() {
        let ws = WaitStatus::new(42 << 8);
        assert_eq!(ws.code(), Some(42));
        assert_eq!(ws.signal(), None);
    }

    #[test]
    fn wait_status_decodes_signal_death() {
        let ws = WaitStatus::new(SIGKILL);
        assert_eq!(ws.code(), None);
        assert_eq!(ws.signal(), Some(SIGKILL));
    }

    #[test]
    fn unknown_job_operations_fail() {
        assert_eq!(wait(99_999), -1);
        assert_eq!(poll(99_999), -1);
        assert_eq!(cancel(99_999), -1);
        assert_eq!(expunge(99_999), -1);
        assert_eq!(get_output(99_999), None);
    }

    #[test]
    fn init_is_idempotent() {
        assert_eq!(init(), 0);
        assert_eq!(init(), 0);
    }
}
