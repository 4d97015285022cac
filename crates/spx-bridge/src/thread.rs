use spx_protocol::WorkerId;

use crate::ThreadError;

/// The engine's pthread bootstrap entry points, called in the order the engine mandates.
pub trait ThreadRuntime: Send {
    /// Parse and instantiate the engine code in this worker.
    fn load(&mut self, worker_id: WorkerId, handlers: &[String]) -> Result<(), ThreadError>;

    fn thread_init(&mut self, pthread_ptr: u64) -> Result<(), ThreadError>;

    /// Block until the thread's mailbox is ready.
    fn mailbox_await(&mut self, pthread_ptr: u64) -> Result<(), ThreadError>;

    fn establish_stack_space(&mut self) -> Result<(), ThreadError>;

    fn init_tls(&mut self) -> Result<(), ThreadError>;

    /// Run the thread's start routine. [`ThreadError::Unwind`] is a normal return to the
    /// event loop.
    fn invoke_entry_point(&mut self, start_routine: u64, arg: u64) -> Result<(), ThreadError>;

    fn thread_exit(&mut self, code: i32);

    fn check_mailbox(&mut self);
}

/// Which pthread (if any) this worker currently runs.
pub(crate) struct ThreadBinding {
    runtime: Option<Box<dyn ThreadRuntime>>,
    pub(crate) pthread_ptr: u64,
    pub(crate) initialized_js: bool,
}

impl ThreadBinding {
    pub(crate) fn new(runtime: Option<Box<dyn ThreadRuntime>>) -> Self {
        Self {
            runtime,
            pthread_ptr: 0,
            initialized_js: false,
        }
    }

    fn runtime(&mut self) -> Result<&mut (dyn ThreadRuntime + 'static), ThreadError> {
        self.runtime.as_deref_mut().ok_or(ThreadError::NoRuntime)
    }

    pub(crate) fn load(&mut self, worker_id: WorkerId, handlers: &[String]) -> Result<(), ThreadError> {
        self.runtime()?.load(worker_id, handlers)
    }

    pub(crate) fn run(&mut self, pthread_ptr: u64, start_routine: u64, arg: u64) -> Result<(), ThreadError> {
        let runtime = self.runtime.as_deref_mut().ok_or(ThreadError::NoRuntime)?;
        runtime.thread_init(pthread_ptr)?;
        self.pthread_ptr = pthread_ptr;
        runtime.mailbox_await(pthread_ptr)?;
        runtime.establish_stack_space()?;
        self.initialized_js = true;
        runtime.init_tls()?;
        match runtime.invoke_entry_point(start_routine, arg) {
            Ok(()) | Err(ThreadError::Unwind) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// `pthread_cancel`: exits with -1 when a thread is bound, otherwise does nothing.
    pub(crate) fn cancel(&mut self) {
        if self.pthread_ptr == 0 {
            return;
        }
        if let Some(runtime) = self.runtime.as_deref_mut() {
            runtime.thread_exit(-1);
        }
        self.pthread_ptr = 0;
    }

    /// Returns whether the mailbox was polled.
    pub(crate) fn check_mailbox(&mut self) -> bool {
        if !self.initialized_js {
            return false;
        }
        match self.runtime.as_deref_mut() {
            Some(runtime) => {
                runtime.check_mailbox();
                true
            }
            None => false,
        }
    }
}
